use std::io::{self, Write};
use std::rc::Rc;

use crate::bytecode::{Arg, DecodeError, FormatError, Instr, Program};
use crate::opcode::Opcode;
use crate::table::{Flags, Table};
use crate::value::{Str, Value, ValueError};

pub mod disasm;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },
    #[error("operand stack exceeded {limit} slots at offset {offset}")]
    StackOverflow { offset: usize, limit: usize },
    #[error("variable {index} out of range, {len} defined (offset {offset})")]
    VariableOutOfRange { offset: usize, index: u64, len: usize },
    #[error("POPS without a matching PSHS at offset {offset}")]
    ScopeUnderflow { offset: usize },
    #[error("{opcode} cannot operate on {found} (offset {offset})")]
    Type { offset: usize, opcode: Opcode, found: String },
    #[error("{source} (offset {offset})")]
    Value { offset: usize, source: ValueError },
    #[error("expected {expected} values, got {found} (offset {offset})")]
    ArityMismatch { offset: usize, expected: usize, found: usize },
    #[error("jump target {target} outside code (offset {offset})")]
    InvalidJump { offset: usize, target: u64 },
    #[error("string pool has no entry {index} (offset {offset})")]
    InvalidStringIndex { offset: usize, index: u32 },
    #[error("table flags must be an integer in 0..=3, got {found} (offset {offset})")]
    InvalidFlags { offset: usize, found: String },
    #[error("step budget of {limit} instructions exhausted")]
    StepLimitExceeded { limit: u64 },
    #[error("trace output failed: {0}")]
    Trace(#[from] io::Error),
}

impl VmError {
    /// Errors that mean the program or its producer is corrupt, as opposed to
    /// a well-formed program misbehaving.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            VmError::Decode(_)
                | VmError::VariableOutOfRange { .. }
                | VmError::ScopeUnderflow { .. }
                | VmError::InvalidJump { .. }
                | VmError::InvalidStringIndex { .. }
        )
    }

    /// Code offset of the failing instruction, when there is one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            VmError::Decode(DecodeError::UnknownOpcode { offset, .. })
            | VmError::Decode(DecodeError::Truncated { offset, .. })
            | VmError::Decode(DecodeError::OutOfBounds { offset })
            | VmError::StackUnderflow { offset }
            | VmError::StackOverflow { offset, .. }
            | VmError::VariableOutOfRange { offset, .. }
            | VmError::ScopeUnderflow { offset }
            | VmError::Type { offset, .. }
            | VmError::Value { offset, .. }
            | VmError::ArityMismatch { offset, .. }
            | VmError::InvalidJump { offset, .. }
            | VmError::InvalidStringIndex { offset, .. }
            | VmError::InvalidFlags { offset, .. } => Some(*offset),
            VmError::Format(_) | VmError::StepLimitExceeded { .. } | VmError::Trace(_) => None,
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Write each instruction and the resulting stack to the trace sink.
    pub trace: bool,
    /// Abort with `StepLimitExceeded` after this many instructions.
    pub max_steps: Option<u64>,
    /// Operand-stack slots (and call frames) allowed before `StackOverflow`.
    pub max_stack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { trace: false, max_steps: None, max_stack: 1 << 20 }
    }
}

// ── Machine ──────────────────────────────────────────────────────────

enum Flow {
    Next,
    Jump(usize),
    Halt,
}

pub struct Vm {
    program: Program,
    config: VmConfig,
    ip: usize,
    stack: Vec<Value>,
    /// Flat, absolutely indexed variable storage.
    vars: Vec<Value>,
    /// Variable-stack lengths saved by PSHS.
    scopes: Vec<usize>,
    /// Return addresses pushed by CALL.
    frames: Vec<usize>,
    steps: u64,
    /// False once the Nil pushed at start has been consumed.
    sentinel: bool,
    trace_out: Box<dyn Write>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Vm {
            program: Program::default(),
            config,
            ip: 0,
            stack: vec![Value::Nil],
            vars: Vec::new(),
            scopes: Vec::new(),
            frames: Vec::new(),
            steps: 0,
            sentinel: true,
            trace_out: Box::new(io::stderr()),
        }
    }

    pub fn with_program(config: VmConfig, program: Program) -> Self {
        let mut vm = Vm::new(config);
        vm.program = program;
        vm
    }

    /// Decodes a ZB container and makes it the program to run.
    pub fn load_program(&mut self, bytes: &[u8]) -> VmResult<()> {
        self.program = Program::from_bytes(bytes)?;
        tracing::debug!(code_len = self.program.code.len(), "program loaded");
        Ok(())
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Redirects trace output, e.g. into a buffer.
    pub fn set_trace_writer(&mut self, out: impl Write + 'static) {
        self.trace_out = Box::new(out);
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn variables(&self) -> &[Value] {
        &self.vars
    }

    fn reset(&mut self) {
        self.ip = 0;
        self.stack.clear();
        self.stack.push(Value::Nil);
        self.vars.clear();
        self.scopes.clear();
        self.frames.clear();
        self.steps = 0;
        self.sentinel = true;
    }

    /// Runs the loaded program to completion and returns what is left on the
    /// operand stack. The initial Nil is only part of the result when nothing
    /// else is.
    pub fn run(&mut self) -> VmResult<Vec<Value>> {
        self.reset();
        tracing::debug!(code_len = self.program.code.len(), "run start");
        while self.ip < self.program.code.len() {
            if let Some(limit) = self.config.max_steps {
                if self.steps >= limit {
                    return Err(VmError::StepLimitExceeded { limit });
                }
            }
            self.steps += 1;

            let instr = self.program.decode(self.ip)?;
            if self.config.trace {
                writeln!(self.trace_out, "{}", disasm::format_instr(&self.program, &instr))?;
            }
            let flow = self.execute(instr)?;
            if self.config.trace {
                writeln!(self.trace_out, "      {}", Value::array(self.stack.clone()).render())?;
            }

            match flow {
                Flow::Next => self.ip = instr.next(),
                Flow::Jump(target) => self.ip = target,
                Flow::Halt => break,
            }
        }
        tracing::debug!(steps = self.steps, depth = self.stack.len(), "run finished");

        let mut result = self.stack.clone();
        if self.sentinel && result.len() > 1 {
            result.remove(0);
        }
        Ok(result)
    }

    // ── Stack helpers ────────────────────────────────────────────────

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.config.max_stack {
            return Err(VmError::StackOverflow { offset: self.ip, limit: self.config.max_stack });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        let value = self.stack.pop().ok_or(VmError::StackUnderflow { offset: self.ip })?;
        if self.stack.is_empty() {
            self.sentinel = false;
        }
        Ok(value)
    }

    /// Removes the top `n` values, returned bottom to top.
    fn take(&mut self, n: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(VmError::StackUnderflow { offset: self.ip });
        }
        let items = self.stack.split_off(self.stack.len() - n);
        if self.stack.is_empty() {
            self.sentinel = false;
        }
        Ok(items)
    }

    fn jump_target(&self, target: u64) -> VmResult<usize> {
        match usize::try_from(target) {
            Ok(t) if t <= self.program.code.len() => Ok(t),
            _ => Err(VmError::InvalidJump { offset: self.ip, target }),
        }
    }

    fn type_error(&self, opcode: Opcode, found: String) -> VmError {
        VmError::Type { offset: self.ip, opcode, found }
    }

    fn value_error(&self, source: ValueError) -> VmError {
        VmError::Value { offset: self.ip, source }
    }

    fn count(arg: Arg) -> usize {
        arg.as_u64().unwrap_or(0) as usize
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn execute(&mut self, instr: Instr) -> VmResult<Flow> {
        let op = instr.opcode;
        match op {
            Opcode::Pnil => self.push(Value::Nil)?,
            Opcode::Ptrue => self.push(Value::Bool(true))?,
            Opcode::Pfalse => self.push(Value::Bool(false))?,
            Opcode::Pint => self.push(Value::Number(Self::count(instr.arg) as f64))?,
            Opcode::Pnum => {
                let Arg::F64(n) = instr.arg else { unreachable!("PNUM decodes an F64") };
                self.push(Value::Number(n))?;
            }
            Opcode::Pstr => {
                let Arg::Str(index) = instr.arg else { unreachable!("PSTR decodes a pool index") };
                let entry = self
                    .program
                    .string(index)
                    .ok_or(VmError::InvalidStringIndex { offset: self.ip, index })?;
                let value = Value::String(Rc::new(Str::with_hash(entry.text.clone(), entry.hash)));
                self.push(value)?;
            }
            Opcode::Parr => {
                let items = self.take(Self::count(instr.arg))?;
                self.push(Value::array(items))?;
            }
            Opcode::Ptab => self.build_table(Self::count(instr.arg), false, false)?,
            Opcode::Ptabf => self.build_table(Self::count(instr.arg), false, true)?,
            Opcode::Ptabp => self.build_table(Self::count(instr.arg), true, false)?,
            Opcode::Ptabpf => self.build_table(Self::count(instr.arg), true, true)?,
            Opcode::Pfun => {
                let address = instr.arg.as_u64().unwrap_or(0);
                let arity = self.pop()?;
                let arity = match arity {
                    Value::Number(n) if n.fract() == 0.0 && n >= 0.0 && n <= u16::MAX as f64 => {
                        n as u16
                    }
                    other => return Err(self.type_error(op, other.render())),
                };
                self.push(Value::function(address, arity))?;
            }

            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top =
                    self.stack.last().cloned().ok_or(VmError::StackUnderflow { offset: self.ip })?;
                self.push(top)?;
            }

            Opcode::Cvar => {
                let value = self.pop()?;
                self.vars.push(value);
            }
            Opcode::Cmvar => {
                let expected = Self::count(instr.arg);
                let items = match self.pop()? {
                    Value::Array(items) => items,
                    other => return Err(self.type_error(op, other.tag().to_string())),
                };
                let items = items.borrow();
                if items.len() != expected {
                    let found = items.len();
                    return Err(VmError::ArityMismatch { offset: self.ip, expected, found });
                }
                self.vars.extend(items.iter().cloned());
            }
            Opcode::Gvar => {
                let index = instr.arg.as_u64().unwrap_or(0);
                let value = self.variable(index)?.clone();
                self.push(value)?;
            }
            Opcode::Svar => {
                let index = instr.arg.as_u64().unwrap_or(0);
                let value = self.pop()?;
                *self.variable_mut(index)? = value;
            }
            Opcode::Pshs => self.scopes.push(self.vars.len()),
            Opcode::Pops => {
                let mark = self.scopes.pop().ok_or(VmError::ScopeUnderflow { offset: self.ip })?;
                self.vars.truncate(mark);
            }

            Opcode::Jmp => {
                return Ok(Flow::Jump(self.jump_target(instr.arg.as_u64().unwrap_or(0))?));
            }
            Opcode::Jmpt | Opcode::Jmpf => {
                let target = self.jump_target(instr.arg.as_u64().unwrap_or(0))?;
                let cond = self.pop()?.truthy();
                if cond == (op == Opcode::Jmpt) {
                    return Ok(Flow::Jump(target));
                }
            }
            Opcode::Call => return self.call(instr),
            Opcode::Ret => {
                return Ok(match self.frames.pop() {
                    Some(ret) => Flow::Jump(ret),
                    None => Flow::Halt,
                });
            }

            Opcode::Neg => match self.pop()? {
                Value::Number(n) => self.push(Value::Number(-n))?,
                other => return Err(self.type_error(op, other.tag().to_string())),
            },
            Opcode::Not => {
                let v = self.pop()?;
                self.push(Value::Bool(!v.truthy()))?;
            }

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Lt
            | Opcode::Lte
            | Opcode::Gt
            | Opcode::Gte => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = self.binary(op, &a, &b)?;
                self.push(result)?;
            }

            Opcode::Get => {
                let key = self.pop()?;
                let container = self.pop()?;
                let value = container.get(&key).map_err(|e| self.value_error(e))?;
                self.push(value)?;
            }
            Opcode::Set => {
                let value = self.pop()?;
                let key = self.pop()?;
                let container = self.pop()?;
                container.set(key, value).map_err(|e| self.value_error(e))?;
            }
            Opcode::Del => {
                let key = self.pop()?;
                let container = self.pop()?;
                container.delete(&key).map_err(|e| self.value_error(e))?;
            }

            Opcode::Inspect => {
                let v = self.pop()?;
                self.push(Value::string(v.render()))?;
            }
            Opcode::Isnil => {
                let v = self.pop()?;
                self.push(Value::Bool(v.is_nil()))?;
            }
            Opcode::Ptr => {
                let v = self.pop()?;
                self.push(v.identity().map_or(Value::Nil, |p| Value::Number(p as f64)))?;
            }
        }
        Ok(Flow::Next)
    }

    fn variable(&self, index: u64) -> VmResult<&Value> {
        let len = self.vars.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| self.vars.get(i))
            .ok_or(VmError::VariableOutOfRange { offset: self.ip, index, len })
    }

    fn variable_mut(&mut self, index: u64) -> VmResult<&mut Value> {
        let (offset, len) = (self.ip, self.vars.len());
        usize::try_from(index)
            .ok()
            .and_then(|i| self.vars.get_mut(i))
            .ok_or(VmError::VariableOutOfRange { offset, index, len })
    }

    /// Builds a table from the top of the stack: an optional prototype, then
    /// `n` groups of `key [flags] value`.
    fn build_table(&mut self, n: usize, with_prototype: bool, with_flags: bool) -> VmResult<()> {
        let group = if with_flags { 3 } else { 2 };
        let total = n
            .checked_mul(group)
            .and_then(|t| t.checked_add(with_prototype as usize))
            .ok_or(VmError::StackUnderflow { offset: self.ip })?;
        let mut items = self.take(total)?.into_iter();

        let mut table = Table::new();
        if with_prototype {
            if let Some(proto) = items.next() {
                table.set_prototype(proto);
            }
        }
        while let Some(key) = items.next() {
            let flags = if with_flags {
                let raw = items.next().unwrap_or(Value::Nil);
                self.flags(&raw)?
            } else {
                Flags::DEFAULT
            };
            let value = items.next().unwrap_or(Value::Nil);
            table.set(key, value, flags).map_err(|e| self.value_error(e))?;
        }
        self.push(Value::table(table))
    }

    fn flags(&self, raw: &Value) -> VmResult<Flags> {
        match raw {
            Value::Number(n) if n.fract() == 0.0 && (0.0..=3.0).contains(n) => {
                Flags::from_bits(*n as u8)
                    .ok_or(VmError::InvalidFlags { offset: self.ip, found: raw.render() })
            }
            other => Err(VmError::InvalidFlags { offset: self.ip, found: other.render() }),
        }
    }

    fn call(&mut self, instr: Instr) -> VmResult<Flow> {
        let argc = Self::count(instr.arg);
        if self.stack.len() < argc + 1 {
            return Err(VmError::StackUnderflow { offset: self.ip });
        }
        let slot = self.stack.len() - argc - 1;
        let Value::Function(function) = &self.stack[slot] else {
            let found = self.stack[slot].tag().to_string();
            return Err(self.type_error(Opcode::Call, found));
        };
        let function = *function;
        let expected = function.arity as usize;
        if expected != argc {
            return Err(VmError::ArityMismatch { offset: self.ip, expected, found: argc });
        }
        if self.frames.len() >= self.config.max_stack {
            return Err(VmError::StackOverflow { offset: self.ip, limit: self.config.max_stack });
        }
        let target = self.jump_target(function.address)?;
        self.stack.remove(slot);
        if self.stack.is_empty() {
            self.sentinel = false;
        }
        self.frames.push(instr.next());
        Ok(Flow::Jump(target))
    }

    fn binary(&self, op: Opcode, a: &Value, b: &Value) -> VmResult<Value> {
        use std::cmp::Ordering;

        match op {
            Opcode::Eq => return Ok(Value::Bool(a.equals(b))),
            Opcode::Neq => return Ok(Value::Bool(!a.equals(b))),
            _ => {}
        }

        let mismatch = || self.type_error(op, format!("{} and {}", a.tag(), b.tag()));
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                let (x, y) = (*x, *y);
                Ok(match op {
                    Opcode::Add => Value::Number(x + y),
                    Opcode::Sub => Value::Number(x - y),
                    Opcode::Mul => Value::Number(x * y),
                    Opcode::Div => Value::Number(x / y),
                    Opcode::Mod => Value::Number(x % y),
                    Opcode::Lt => Value::Bool(x < y),
                    Opcode::Lte => Value::Bool(x <= y),
                    Opcode::Gt => Value::Bool(x > y),
                    Opcode::Gte => Value::Bool(x >= y),
                    _ => return Err(mismatch()),
                })
            }
            (Value::String(x), Value::String(y)) => {
                let ord = x.as_str().cmp(y.as_str());
                Ok(match op {
                    Opcode::Add => Value::string(format!("{}{}", x.as_str(), y.as_str())),
                    Opcode::Lt => Value::Bool(ord == Ordering::Less),
                    Opcode::Lte => Value::Bool(ord != Ordering::Greater),
                    Opcode::Gt => Value::Bool(ord == Ordering::Greater),
                    Opcode::Gte => Value::Bool(ord != Ordering::Less),
                    _ => return Err(mismatch()),
                })
            }
            _ => Err(mismatch()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::assembler::Assembler;
    use crate::listing::assemble;

    fn run(listing: &str) -> VmResult<Vec<Value>> {
        let program = assemble(listing).unwrap();
        Vm::with_program(VmConfig::default(), program).run()
    }

    fn run_one(listing: &str) -> Value {
        let mut values = run(listing).unwrap();
        assert_eq!(values.len(), 1, "expected a single result, got {values:?}");
        values.remove(0)
    }

    #[test]
    fn pop_then_push_leaves_one_number() {
        let values = run("PNUM 3.1416\nPOP\nPNUM 2.5").unwrap();
        assert_eq!(values.len(), 1);
        assert!(matches!(values[0], Value::Number(n) if n == 2.5));
    }

    #[test]
    fn empty_program_returns_sentinel() {
        assert_eq!(run("").unwrap(), vec![Value::Nil]);
    }

    #[test]
    fn array_construction_renders() {
        let v = run_one("PTRUE\nPFALSE\nPARR 2");
        assert_eq!(v.render(), "[true, false]");
    }

    #[test]
    fn loads_serialized_program() {
        let mut asm = Assembler::new();
        asm.add_with(Opcode::Pstr, "hi").unwrap();
        let bytes = asm.serialize().unwrap();
        let mut vm = Vm::new(VmConfig::default());
        vm.load_program(&bytes).unwrap();
        assert_eq!(vm.run().unwrap(), vec![Value::string("hi")]);
        // runs are repeatable
        assert_eq!(vm.run().unwrap(), vec![Value::string("hi")]);
    }

    #[test]
    fn load_rejects_bad_container() {
        let mut vm = Vm::new(VmConfig::default());
        assert!(matches!(
            vm.load_program(b"nope"),
            Err(VmError::Format(FormatError::TruncatedHeader { .. }))
        ));
    }

    #[test]
    fn cmvar_arity_mismatch_aborts() {
        let err = run("PINT 1\nPINT 2\nPINT 3\nPARR 3\nCMVAR 2\nPINT 9").unwrap_err();
        assert!(matches!(err, VmError::ArityMismatch { expected: 2, found: 3, .. }));
        assert!(!err.is_internal());
    }

    #[test]
    fn cmvar_binds_in_element_order() {
        let v = run_one("PINT 1\nPINT 2\nPARR 2\nCMVAR 2\nGVAR 0\nGVAR 1\nSUB");
        assert_eq!(v, Value::Number(-1.0));
    }

    #[test]
    fn variables_and_scopes() {
        let listing = "PINT 1\nCVAR\nPSHS\nPINT 5\nCVAR\nGVAR 1\nSVAR 0\nPOPS\nGVAR 0";
        assert_eq!(run_one(listing), Value::Number(5.0));
        let err = run("PSHS\nPINT 1\nCVAR\nPOPS\nGVAR 0").unwrap_err();
        assert!(matches!(err, VmError::VariableOutOfRange { index: 0, len: 0, .. }));
        assert!(err.is_internal());
    }

    #[test]
    fn unmatched_pops_is_internal() {
        let err = run("POPS").unwrap_err();
        assert!(matches!(err, VmError::ScopeUnderflow { offset: 0 }));
        assert!(err.is_internal());
    }

    #[test]
    fn subtraction_operand_order() {
        assert_eq!(run_one("PINT 10\nPINT 4\nSUB"), Value::Number(6.0));
        assert_eq!(run_one("PINT 1\nPINT 0\nDIV"), Value::Number(f64::INFINITY));
        assert_eq!(run_one("PINT 7\nPINT 3\nMOD"), Value::Number(1.0));
        assert!(matches!(run_one("PINT 0\nPINT 0\nDIV"), Value::Number(n) if n.is_nan()));
    }

    #[test]
    fn string_operators() {
        assert_eq!(run_one("PSTR \"ab\"\nPSTR \"cd\"\nADD"), Value::string("abcd"));
        assert_eq!(run_one("PSTR \"a\"\nPSTR \"b\"\nLT"), Value::Bool(true));
        let err = run("PSTR \"a\"\nPINT 1\nADD").unwrap_err();
        let VmError::Type { opcode: Opcode::Add, ref found, .. } = err else {
            panic!("expected a type error from ADD, got {err:?}");
        };
        assert_eq!(found, "string and number");
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(run_one("PINT 1\nPINT 2\nLTE"), Value::Bool(true));
        assert_eq!(run_one("PINT 1\nPNUM 1.0\nEQ"), Value::Bool(true));
        assert_eq!(run_one("PINT 1\nPSTR \"1\"\nNEQ"), Value::Bool(true));
        assert_eq!(run_one("PNIL\nNOT"), Value::Bool(true));
        assert_eq!(run_one("PINT 3\nNEG"), Value::Number(-3.0));
    }

    #[test]
    fn conditional_jumps() {
        let listing = "PFALSE\nJMPF skip\nPINT 1\nskip:\nPINT 2";
        assert_eq!(run_one(listing), Value::Number(2.0));
        let listing = "PTRUE\nJMPF skip\nPINT 1\nskip:";
        assert_eq!(run_one(listing), Value::Number(1.0));
    }

    #[test]
    fn countdown_loop() {
        let listing = "
            PINT 3
            CVAR
        top:
            GVAR 0
            JMPF done
            GVAR 0
            PINT 1
            SUB
            SVAR 0
            JMP top
        done:
            GVAR 0
        ";
        assert_eq!(run_one(listing), Value::Number(0.0));
    }

    #[test]
    fn function_call_and_return() {
        let listing = "
            PINT 1
            PFUN double
            PINT 21
            CALL 1
            JMP end
        double:
            PINT 2
            MUL
            RET
        end:
        ";
        assert_eq!(run_one(listing), Value::Number(42.0));
    }

    #[test]
    fn call_checks_arity() {
        let err = run("PINT 2\nPFUN f\nPINT 1\nCALL 1\nf: RET").unwrap_err();
        assert!(matches!(err, VmError::ArityMismatch { expected: 2, found: 1, .. }));
        let err = run("PINT 1\nCALL 0").unwrap_err();
        assert!(matches!(err, VmError::Type { opcode: Opcode::Call, .. }));
    }

    #[test]
    fn bare_ret_halts() {
        assert_eq!(run_one("PINT 1\nRET\nPINT 2"), Value::Number(1.0));
    }

    #[test]
    fn tables_with_flags_and_prototype() {
        let listing = "
            PSTR \"base\"
            PINT 1
            PTAB 1
            PSTR \"own\"
            PINT 1
            PINT 2
            PTABPF 1
            DUP
            PSTR \"base\"
            GET
            CVAR
            INSPECT
        ";
        let values = run(listing).unwrap();
        assert_eq!(values, vec![Value::string("{\"own\": 2}")]);
    }

    #[test]
    fn hidden_entry_is_not_rendered() {
        let v = run_one("PSTR \"k\"\nPINT 2\nPINT 1\nPTABF 1\nINSPECT");
        assert_eq!(v, Value::string("{}"));
        let err = run("PSTR \"k\"\nPINT 7\nPINT 1\nPTABF 1").unwrap_err();
        assert!(matches!(err, VmError::InvalidFlags { .. }));
    }

    #[test]
    fn get_set_delete() {
        let listing = "
            PTAB 0
            CVAR
            GVAR 0
            PSTR \"a\"
            PINT 1
            SET
            GVAR 0
            PSTR \"b\"
            PINT 2
            SET
            GVAR 0
            PSTR \"a\"
            DEL
            GVAR 0
            INSPECT
        ";
        assert_eq!(run_one(listing), Value::string("{\"b\": 2}"));

        let err = run("PTAB 0\nPSTR \"x\"\nGET").unwrap_err();
        assert!(matches!(err, VmError::Value { source: ValueError::KeyNotFound { .. }, .. }));
        let err = run("PINT 1\nPINT 0\nGET").unwrap_err();
        assert!(matches!(err, VmError::Value { source: ValueError::NotIndexable { .. }, .. }));
    }

    #[test]
    fn array_get_and_append() {
        let v = run_one("PINT 5\nPARR 1\nDUP\nPINT 1\nPINT 6\nSET\nINSPECT");
        assert_eq!(v, Value::string("[5, 6]"));
    }

    #[test]
    fn prototype_table_with_default_flags() {
        let base = "PSTR \"base\"\nPINT 1\nPTAB 1\nPSTR \"own\"\nPINT 2\nPTABP 1\n";
        let table = run_one(base);
        let Value::Table(t) = &table else {
            panic!("expected a table, got {table:?}");
        };
        let flags = t.borrow().flags(&Value::string("own"));
        assert_eq!(flags, Ok(Some(Flags::PUBLIC | Flags::MUTABLE)));
        assert_eq!(t.borrow().len(), 1);
        assert_eq!(table.render(), "{\"own\": 2}");

        assert_eq!(run_one(&format!("{base}PSTR \"base\"\nGET")), Value::Number(1.0));
        assert_eq!(run_one(&format!("{base}PSTR \"own\"\nGET")), Value::Number(2.0));
    }

    #[test]
    fn array_used_as_its_own_index() {
        let err = run("PARR 0\nDUP\nDUP\nSET").unwrap_err();
        assert!(matches!(err, VmError::Value { source: ValueError::InvalidIndex { .. }, .. }));
        let err = run("PARR 0\nDUP\nDEL").unwrap_err();
        assert!(matches!(err, VmError::Value { source: ValueError::InvalidIndex { .. }, .. }));
        let err = run("PARR 0\nDUP\nGET").unwrap_err();
        assert!(matches!(err, VmError::Value { source: ValueError::InvalidIndex { .. }, .. }));
    }

    const SELF_CONTAINING: &str = "
        PARR 0
        CVAR
        GVAR 0
        PINT 0
        GVAR 0
        SET
        PARR 0
        CVAR
        GVAR 1
        PINT 0
        GVAR 1
        SET
    ";

    #[test]
    fn self_containing_array_renders() {
        let v = run_one(&format!("{SELF_CONTAINING}GVAR 0\nINSPECT"));
        assert_eq!(v, Value::string("[[...]]"));
    }

    #[test]
    fn self_containing_arrays_compare() {
        assert_eq!(run_one(&format!("{SELF_CONTAINING}GVAR 0\nGVAR 1\nEQ")), Value::Bool(true));
        let listing = format!("{SELF_CONTAINING}GVAR 1\nPINT 1\nPNIL\nSET\nGVAR 0\nGVAR 1\nEQ");
        assert_eq!(run_one(&listing), Value::Bool(false));
    }

    #[test]
    fn reflection() {
        assert_eq!(run_one("PNIL\nISNIL"), Value::Bool(true));
        assert_eq!(run_one("PINT 0\nPTR"), Value::Nil);
        assert!(matches!(run_one("PARR 0\nPTR"), Value::Number(n) if n > 0.0));
    }

    #[test]
    fn dup_shares_the_reference() {
        let values = run("PARR 0\nDUP\nPINT 0\nPINT 1\nSET").unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].render(), "[1]");
    }

    #[test]
    fn underflow_and_overflow() {
        assert!(matches!(run("POP\nPOP"), Err(VmError::StackUnderflow { offset: 1 })));
        assert!(matches!(run("PARR 5"), Err(VmError::StackUnderflow { .. })));
        let config = VmConfig { max_stack: 3, ..VmConfig::default() };
        let program = assemble("PNIL\nPNIL\nPNIL").unwrap();
        let err = Vm::with_program(config, program).run().unwrap_err();
        assert!(matches!(err, VmError::StackOverflow { limit: 3, .. }));
    }

    #[test]
    fn popped_sentinel_is_not_reported() {
        let values = run("POP\nPINT 1\nPINT 2").unwrap();
        assert_eq!(values, vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(run("POP").unwrap(), vec![]);
    }

    #[test]
    fn step_budget() {
        let config = VmConfig { max_steps: Some(100), ..VmConfig::default() };
        let program = assemble("top: JMP top").unwrap();
        let err = Vm::with_program(config, program).run().unwrap_err();
        assert!(matches!(err, VmError::StepLimitExceeded { limit: 100 }));
    }

    #[test]
    fn bad_bytes_are_internal() {
        let program = Program { code: vec![0xEE], strings: vec![] };
        let err = Vm::with_program(VmConfig::default(), program).run().unwrap_err();
        assert!(err.is_internal());
        assert_eq!(err.offset(), Some(0));

        let program = assemble("JMP 999").unwrap();
        let err = Vm::with_program(VmConfig::default(), program).run().unwrap_err();
        assert!(matches!(err, VmError::InvalidJump { target: 999, .. }));
    }

    #[derive(Clone, Default)]
    struct Sink(Rc<RefCell<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn trace_does_not_change_results() {
        let listing = "PINT 1\nPINT 2\nADD";
        let sink = Sink::default();
        let config = VmConfig { trace: true, ..VmConfig::default() };
        let mut vm = Vm::with_program(config, assemble(listing).unwrap());
        vm.set_trace_writer(sink.clone());
        assert_eq!(vm.run().unwrap(), run(listing).unwrap());

        let text = String::from_utf8(sink.0.borrow().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "0000  PINT 1",
                "      [nil, 1]",
                "0002  PINT 2",
                "      [nil, 1, 2]",
                "0004  ADD",
                "      [nil, 3]",
            ]
        );
    }
}
