/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str, // one line, for listings
    pub long: &'static str,  // full explanation for `zoe explain`
}

/// All stable error codes.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Container format ─────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZOE-F001",
        short: "file shorter than the header",
        long: r#"## ZOE-F001: file shorter than the header

Every ZB file starts with 16 bytes: the 8-byte magic `ZOEBC\0\0\x01`
followed by the little-endian offset of the string pool. The input ended
before those 16 bytes.

The file is probably empty or was cut off while being written.
"#,
    },
    ErrorEntry {
        code: "ZOE-F002",
        short: "bad magic or version",
        long: r#"## ZOE-F002: bad magic or version

The first 8 bytes are not `ZOEBC\0\0\x01`. Either the file is not a ZB
file at all, or it was written by an incompatible format version.

Listings (text) must be assembled first:

    zoe asm program.zasm -o program.zb
"#,
    },
    ErrorEntry {
        code: "ZOE-F003",
        short: "string pool offset out of range",
        long: r#"## ZOE-F003: string pool offset out of range

Bytes 8..16 hold the offset where the string pool begins. It must be at
least 16 (the header size) and no larger than the file. Anything else
means the header is corrupt.
"#,
    },
    ErrorEntry {
        code: "ZOE-F004",
        short: "malformed string pool entry",
        long: r#"## ZOE-F004: malformed string pool entry

Each string pool entry is UTF-8 text, a NUL byte, then an 8-byte hash.
An entry was missing its terminator, was not valid UTF-8, or ran out of
bytes before its hash. Trailing junk after the last entry also lands
here.
"#,
    },
    ErrorEntry {
        code: "ZOE-F005",
        short: "string pool hash mismatch",
        long: r#"## ZOE-F005: string pool hash mismatch

The hash stored after a pool string does not match the hash of its text.
The file was modified after it was written, or produced by a tool using a
different hash function.
"#,
    },
    // ── Assembler ────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZOE-A001",
        short: "wrong immediate for opcode",
        long: r#"## ZOE-A001: wrong immediate for opcode

Every opcode has a fixed operand shape (none, u8, u16, u32, u64, f64 or a
string). The immediate supplied does not have that shape.

**Example:**

    PINT 3.5      ; PINT takes a u8, use PNUM for floats
"#,
    },
    ErrorEntry {
        code: "ZOE-A002",
        short: "variable declared twice in one scope",
        long: r#"## ZOE-A002: variable declared twice in one scope

A name may be declared once per scope. Inner scopes may shadow names
from outer ones.
"#,
    },
    ErrorEntry {
        code: "ZOE-A003",
        short: "unknown variable",
        long: r#"## ZOE-A003: unknown variable

The name is not declared in the current scope or any enclosing one.
"#,
    },
    ErrorEntry {
        code: "ZOE-A004",
        short: "string pool full",
        long: r#"## ZOE-A004: string pool full

String operands are 4-byte pool indices, so a program can hold at most
2^32 pool entries.
"#,
    },
    ErrorEntry {
        code: "ZOE-A005",
        short: "unresolved label at finalize",
        long: r#"## ZOE-A005: unresolved label at finalize

A label was created but never given an address. Every label must be
resolved before the program is finalized, whether or not it is
referenced.

Listings report the same mistake as ZOE-L003, pointing at the first use
of the label.
"#,
    },
    // ── Listings ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZOE-L001",
        short: "unexpected input in listing",
        long: r#"## ZOE-L001: unexpected input in listing

The listing contains characters that are not part of any token. Valid
input is mnemonics, `label:` definitions, numbers, double-quoted strings
and `;` comments.

**Example:**

    PNUM $5
"#,
    },
    ErrorEntry {
        code: "ZOE-L002",
        short: "malformed listing line",
        long: r#"## ZOE-L002: malformed listing line

Each line holds optional label definitions, then at most one mnemonic and
its operand. This covers unknown mnemonics, missing or extra operands,
integers that do not fit the operand width and labels defined twice.

**Example:**

    PINT 300      ; PINT takes a u8
    POP 1         ; POP takes no operand
"#,
    },
    ErrorEntry {
        code: "ZOE-L003",
        short: "label never defined",
        long: r#"## ZOE-L003: label never defined

A jump or PFUN names a label that no line defines.

**Example:**

    JMP done
    ; missing `done:` somewhere below
"#,
    },
    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZOE-R001",
        short: "operand stack underflow",
        long: r#"## ZOE-R001: operand stack underflow

An instruction needed more operands than the stack held.

**Example:**

    PINT 1
    ADD           ; ADD needs two values
"#,
    },
    ErrorEntry {
        code: "ZOE-R002",
        short: "operand stack overflow",
        long: r#"## ZOE-R002: operand stack overflow

The operand stack or the call stack grew past its configured limit,
usually through unbounded recursion or a loop that pushes without
popping.
"#,
    },
    ErrorEntry {
        code: "ZOE-R003",
        short: "operand type mismatch",
        long: r#"## ZOE-R003: operand type mismatch

The operator does not accept the operand types it was given. Arithmetic
needs numbers, `ADD` and comparisons also accept two strings, `CALL`
needs a function below its arguments and `CMVAR` needs an array.
"#,
    },
    ErrorEntry {
        code: "ZOE-R004",
        short: "indexed access failed",
        long: r#"## ZOE-R004: indexed access failed

`GET`, `SET` or `DEL` failed: the key is missing from the table and its
prototypes, the array index is out of range or not an integer, the key
is an array or table (which cannot be hashed), or the container is not
indexable at all.
"#,
    },
    ErrorEntry {
        code: "ZOE-R005",
        short: "arity mismatch",
        long: r#"## ZOE-R005: arity mismatch

`CMVAR n` was given an array whose length is not `n`, or `CALL n` was
used on a function declared with a different arity.

**Example:**

    PINT 1
    PINT 2
    PINT 3
    PARR 3
    CMVAR 2       ; three elements, two slots
"#,
    },
    ErrorEntry {
        code: "ZOE-R006",
        short: "invalid table flags",
        long: r#"## ZOE-R006: invalid table flags

`PTABF` and `PTABPF` expect each entry's flags as an integer from 0 to 3
(bit 0 = PUBLIC, bit 1 = MUTABLE).
"#,
    },
    ErrorEntry {
        code: "ZOE-R007",
        short: "step budget exhausted",
        long: r#"## ZOE-R007: step budget exhausted

The program executed more instructions than `--max-steps` allows. Raise
the limit, or look for a jump that never reaches its exit.
"#,
    },
    ErrorEntry {
        code: "ZOE-R008",
        short: "trace output failed",
        long: r#"## ZOE-R008: trace output failed

Writing the execution trace failed, typically because stderr was closed.
"#,
    },
    // ── Internal ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZOE-I002",
        short: "label from another assembler",
        long: r#"## ZOE-I002: label from another assembler

A label handle was used with an assembler that did not create it.
"#,
    },
    ErrorEntry {
        code: "ZOE-I003",
        short: "scope exit without enter",
        long: r#"## ZOE-I003: scope exit without enter

`POPS` ran (or `exit_scope` was called) with no matching `PSHS`. Scope
instructions are emitted in pairs, so this points at corrupt bytecode.
"#,
    },
    ErrorEntry {
        code: "ZOE-I004",
        short: "unknown opcode",
        long: r#"## ZOE-I004: unknown opcode

The byte at the instruction pointer is not a defined opcode. Either the
file is corrupt or a jump landed in the middle of an instruction.
"#,
    },
    ErrorEntry {
        code: "ZOE-I005",
        short: "truncated instruction",
        long: r#"## ZOE-I005: truncated instruction

The code ended in the middle of an instruction's operand.
"#,
    },
    ErrorEntry {
        code: "ZOE-I006",
        short: "variable index out of range",
        long: r#"## ZOE-I006: variable index out of range

`GVAR` or `SVAR` named a variable slot that does not exist. Slot numbers
are assigned when the program is assembled, so this indicates a
producer bug or a `POPS` that discarded the slot.
"#,
    },
    ErrorEntry {
        code: "ZOE-I007",
        short: "jump outside code",
        long: r#"## ZOE-I007: jump outside code

A jump, call or function address points past the end of the code.
"#,
    },
    ErrorEntry {
        code: "ZOE-I008",
        short: "missing string pool entry",
        long: r#"## ZOE-I008: missing string pool entry

`PSTR` referred to a pool index the file does not contain.
"#,
    },
];

/// Look up an error entry by code (e.g. `"ZOE-R005"`), ignoring case.
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}
