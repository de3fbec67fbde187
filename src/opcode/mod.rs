//! The fixed instruction set shared by the assembler and the VM.
//!
//! [`for_each_opcode!`] holds the canonical table (code, mnemonic, operand
//! shape) and feeds it to [`define_opcodes!`], which generates [`Opcode`],
//! its `TryFrom<u8>` decoder and the mnemonic/shape lookups. The operand shape
//! is a static property of the opcode alone: the VM advances by
//! `1 + operand().width()` after every instruction.

use serde::Serialize;

/// Immediate-operand shape of an opcode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Operand {
    None,
    U8,
    U16,
    U32,
    U64,
    F64,
    /// 4-byte index into the string pool.
    Str,
}

impl Operand {
    /// Encoded width of the immediate in bytes.
    pub const fn width(self) -> usize {
        match self {
            Operand::None => 0,
            Operand::U8 => 1,
            Operand::U16 => 2,
            Operand::U32 | Operand::Str => 4,
            Operand::U64 | Operand::F64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Operand::None => "none",
            Operand::U8 => "u8",
            Operand::U16 => "u16",
            Operand::U32 => "u32",
            Operand::U64 => "u64",
            Operand::F64 => "f64",
            Operand::Str => "string",
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown opcode 0x{0:02x}")]
pub struct UnknownOpcode(pub u8);

/// Invokes a callback macro with the complete opcode list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // ── Stack push ──────────────────────────────────────────
            /// PNIL ; push nil
            Pnil = 0x00, "PNIL", None;
            /// PTRUE ; push true
            Ptrue = 0x01, "PTRUE", None;
            /// PFALSE ; push false
            Pfalse = 0x02, "PFALSE", None;
            /// PINT imm8 ; push a small non-negative integer as a number
            Pint = 0x03, "PINT", U8;
            /// PNUM f64 ; push a number
            Pnum = 0x04, "PNUM", F64;
            /// PSTR str ; push a string from the pool
            Pstr = 0x05, "PSTR", Str;
            /// PARR n ; collect the top n values into an array
            Parr = 0x06, "PARR", U32;
            /// PTAB n ; collect n (key, value) pairs into a table
            Ptab = 0x07, "PTAB", U32;
            /// PTABF n ; collect n (key, flags, value) triples into a table
            Ptabf = 0x08, "PTABF", U32;
            /// PTABP n ; prototype followed by n (key, value) pairs
            Ptabp = 0x09, "PTABP", U32;
            /// PTABPF n ; prototype followed by n (key, flags, value) triples
            Ptabpf = 0x0A, "PTABPF", U32;
            /// PFUN addr ; pop arity, push function(addr, arity)
            Pfun = 0x0B, "PFUN", U64;
            // ── Stack pop ───────────────────────────────────────────
            /// POP ; drop the top value
            Pop = 0x10, "POP", None;
            /// DUP ; push another reference to the top value
            Dup = 0x11, "DUP", None;
            // ── Variables and scopes ────────────────────────────────
            /// CVAR ; move the top value into a new variable slot
            Cvar = 0x18, "CVAR", None;
            /// CMVAR n ; destructure an n-element array into n new slots
            Cmvar = 0x19, "CMVAR", U32;
            /// GVAR idx ; push variable idx
            Gvar = 0x1A, "GVAR", U64;
            /// SVAR idx ; pop into variable idx
            Svar = 0x1B, "SVAR", U64;
            /// PSHS ; push a scope mark
            Pshs = 0x1C, "PSHS", None;
            /// POPS ; pop a scope mark, dropping its variables
            Pops = 0x1D, "POPS", None;
            // ── Control flow ────────────────────────────────────────
            /// JMP addr ; unconditional jump
            Jmp = 0x20, "JMP", U64;
            /// JMPT addr ; pop, jump if truthy
            Jmpt = 0x21, "JMPT", U64;
            /// JMPF addr ; pop, jump if falsy
            Jmpf = 0x22, "JMPF", U64;
            /// CALL argc ; call the function below argc arguments
            Call = 0x23, "CALL", U16;
            /// RET ; return to the caller, or halt at top level
            Ret = 0x24, "RET", None;
            // ── Unary operators ─────────────────────────────────────
            /// NEG ; numeric negation
            Neg = 0x30, "NEG", None;
            /// NOT ; logical negation
            Not = 0x31, "NOT", None;
            // ── Binary operators ────────────────────────────────────
            /// ADD ; a + b (numbers) or concatenation (strings)
            Add = 0x38, "ADD", None;
            /// SUB ; a - b
            Sub = 0x39, "SUB", None;
            /// MUL ; a * b
            Mul = 0x3A, "MUL", None;
            /// DIV ; a / b
            Div = 0x3B, "DIV", None;
            /// MOD ; a % b
            Mod = 0x3C, "MOD", None;
            /// EQ ; a == b
            Eq = 0x3D, "EQ", None;
            /// NEQ ; a != b
            Neq = 0x3E, "NEQ", None;
            /// LT ; a < b
            Lt = 0x3F, "LT", None;
            /// LTE ; a <= b
            Lte = 0x40, "LTE", None;
            /// GT ; a > b
            Gt = 0x41, "GT", None;
            /// GTE ; a >= b
            Gte = 0x42, "GTE", None;
            // ── Indexed access ──────────────────────────────────────
            /// GET ; container[key]
            Get = 0x48, "GET", None;
            /// SET ; container[key] = value
            Set = 0x49, "SET", None;
            /// DEL ; remove container[key]
            Del = 0x4A, "DEL", None;
            // ── Reflection ──────────────────────────────────────────
            /// INSPECT ; replace the top value with its rendering
            Inspect = 0x50, "INSPECT", None;
            /// ISNIL ; replace the top value with whether it is nil
            Isnil = 0x51, "ISNIL", None;
            /// PTR ; replace the top value with the address of its payload
            Ptr = 0x52, "PTR", None;
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $code:literal, $mnemonic:literal, $operand:ident;
        )*
    ) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $code,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = UnknownOpcode;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $code => Ok(Opcode::$name), )*
                    _ => Err(UnknownOpcode(value)),
                }
            }
        }

        impl Opcode {
            /// Every opcode, in table order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Assembly mnemonic.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Immediate-operand shape.
            pub const fn operand(self) -> Operand {
                match self {
                    $( Opcode::$name => Operand::$operand, )*
                }
            }

            /// Case-insensitive mnemonic lookup.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                $(
                    if name.eq_ignore_ascii_case($mnemonic) {
                        return Some(Opcode::$name);
                    }
                )*
                None
            }
        }
    };
}

for_each_opcode!(define_opcodes);

impl Opcode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Total encoded size: opcode byte plus immediate.
    pub const fn size(self) -> usize {
        1 + self.operand().width()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
