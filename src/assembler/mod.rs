//! Bytecode builder.
//!
//! The [`Assembler`] accumulates code, a string pool and a label table, then
//! consumes itself in [`Assembler::finalize`] to produce an immutable
//! [`Program`]. Labels exist only while building: a [`Label`] is a handle
//! owning one resolved address and the list of sites where that address must
//! be written.

use crate::bytecode::{FormatError, PoolString, Program};
use crate::opcode::{Opcode, Operand};

/// Bytes written at every label reference until `finalize` patches them.
pub const PLACEHOLDER: [u8; 8] = [0xFF; 8];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AsmError {
    #[error("{opcode} takes a {expected} operand, got {found}")]
    InvalidOperand { opcode: Opcode, expected: Operand, found: &'static str },
    #[error("label L{label} was never resolved")]
    UnresolvedLabel { label: usize, name: Option<String> },
    #[error("label L{label} does not belong to this assembler")]
    UnknownLabel { label: usize },
    #[error("variable '{name}' is already declared in this scope")]
    DuplicateName { name: String },
    #[error("unknown variable '{name}'")]
    UnknownName { name: String },
    #[error("scope exit without a matching enter")]
    ScopeUnderflow,
    #[error("string pool is full")]
    PoolOverflow,
}

impl AsmError {
    /// A label handle from another assembler points at a bug in the
    /// producer, not bad input.
    pub fn is_internal(&self) -> bool {
        matches!(self, AsmError::UnknownLabel { .. })
    }
}

type AsmResult<T> = Result<T, AsmError>;

/// An immediate passed to [`Assembler::add_with`].
#[derive(Debug, Clone, PartialEq)]
pub enum Immediate {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Str(String),
}

impl Immediate {
    fn shape(&self) -> Operand {
        match self {
            Immediate::U8(_) => Operand::U8,
            Immediate::U16(_) => Operand::U16,
            Immediate::U32(_) => Operand::U32,
            Immediate::U64(_) => Operand::U64,
            Immediate::F64(_) => Operand::F64,
            Immediate::Str(_) => Operand::Str,
        }
    }

    fn name(&self) -> &'static str {
        self.shape().name()
    }
}

impl From<u8> for Immediate {
    fn from(v: u8) -> Self {
        Immediate::U8(v)
    }
}

impl From<u16> for Immediate {
    fn from(v: u16) -> Self {
        Immediate::U16(v)
    }
}

impl From<u32> for Immediate {
    fn from(v: u32) -> Self {
        Immediate::U32(v)
    }
}

impl From<u64> for Immediate {
    fn from(v: u64) -> Self {
        Immediate::U64(v)
    }
}

impl From<f64> for Immediate {
    fn from(v: f64) -> Self {
        Immediate::F64(v)
    }
}

impl From<&str> for Immediate {
    fn from(v: &str) -> Self {
        Immediate::Str(v.to_string())
    }
}

impl From<String> for Immediate {
    fn from(v: String) -> Self {
        Immediate::Str(v)
    }
}

/// Opaque label handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl Label {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
struct LabelSlot {
    name: Option<String>,
    address: Option<u64>,
    sites: Vec<usize>,
}

#[derive(Debug)]
struct Variable {
    name: String,
    mutable: bool,
}

/// A variable resolved through the scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Absolute index into the VM's variable stack.
    pub index: u64,
    pub mutable: bool,
}

#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    strings: Vec<PoolString>,
    labels: Vec<LabelSlot>,
    variables: Vec<Variable>,
    /// Base index into `variables` of each open scope.
    scopes: Vec<usize>,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler::default()
    }

    /// Current code length, i.e. the offset the next instruction lands at.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    // ── Emission ─────────────────────────────────────────────────────

    /// Appends an opcode that takes no immediate.
    pub fn add(&mut self, opcode: Opcode) -> AsmResult<()> {
        if opcode.operand() != Operand::None {
            let expected = opcode.operand();
            return Err(AsmError::InvalidOperand { opcode, expected, found: "none" });
        }
        self.code.push(opcode.code());
        Ok(())
    }

    /// Appends an opcode and its little-endian immediate. Strings are appended
    /// to the pool and the opcode refers to the new entry.
    pub fn add_with(&mut self, opcode: Opcode, imm: impl Into<Immediate>) -> AsmResult<()> {
        let imm = imm.into();
        let expected = opcode.operand();
        if imm.shape() != expected {
            return Err(AsmError::InvalidOperand { opcode, expected, found: imm.name() });
        }
        self.code.push(opcode.code());
        match imm {
            Immediate::U8(v) => self.code.push(v),
            Immediate::U16(v) => self.code.extend_from_slice(&v.to_le_bytes()),
            Immediate::U32(v) => self.code.extend_from_slice(&v.to_le_bytes()),
            Immediate::U64(v) => self.code.extend_from_slice(&v.to_le_bytes()),
            Immediate::F64(v) => self.code.extend_from_slice(&v.to_bits().to_le_bytes()),
            Immediate::Str(s) => {
                let index = self.intern(s)?;
                self.code.extend_from_slice(&index.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Appends a string to the pool without deduplication.
    fn intern(&mut self, s: String) -> AsmResult<u32> {
        let index = u32::try_from(self.strings.len()).map_err(|_| AsmError::PoolOverflow)?;
        self.strings.push(PoolString::new(s));
        Ok(index)
    }

    // ── Labels ───────────────────────────────────────────────────────

    pub fn create_label(&mut self) -> Label {
        self.labels.push(LabelSlot::default());
        Label(self.labels.len() - 1)
    }

    /// Like `create_label`, but the name is kept for error reports.
    pub fn create_named_label(&mut self, name: impl Into<String>) -> Label {
        self.labels.push(LabelSlot { name: Some(name.into()), ..LabelSlot::default() });
        Label(self.labels.len() - 1)
    }

    /// Resolves `label` to the current position. Resolving twice overwrites.
    pub fn set_label(&mut self, label: Label) -> AsmResult<()> {
        let position = self.code.len() as u64;
        let slot = self.slot_mut(label)?;
        if let Some(previous) = slot.address {
            tracing::warn!(
                label = label.0,
                previous,
                position,
                "label resolved twice, keeping the last address"
            );
        }
        slot.address = Some(position);
        Ok(())
    }

    /// Records a reference site and reserves 8 placeholder bytes for it.
    pub fn add_label(&mut self, label: Label) -> AsmResult<()> {
        let site = self.code.len();
        self.slot_mut(label)?.sites.push(site);
        self.code.extend_from_slice(&PLACEHOLDER);
        Ok(())
    }

    /// Emits an opcode whose 8-byte immediate is the address of `label`.
    pub fn add_jump(&mut self, opcode: Opcode, label: Label) -> AsmResult<()> {
        if opcode.operand() != Operand::U64 {
            let expected = opcode.operand();
            return Err(AsmError::InvalidOperand { opcode, expected, found: "label" });
        }
        self.slot_mut(label)?;
        self.code.push(opcode.code());
        self.add_label(label)
    }

    fn slot_mut(&mut self, label: Label) -> AsmResult<&mut LabelSlot> {
        self.labels.get_mut(label.0).ok_or(AsmError::UnknownLabel { label: label.0 })
    }

    // ── Variables ────────────────────────────────────────────────────

    /// Opens a compile-time scope and emits `PSHS`.
    pub fn enter_scope(&mut self) -> AsmResult<()> {
        self.scopes.push(self.variables.len());
        self.add(Opcode::Pshs)
    }

    /// Closes the innermost scope and emits `POPS`.
    pub fn exit_scope(&mut self) -> AsmResult<()> {
        let base = self.scopes.pop().ok_or(AsmError::ScopeUnderflow)?;
        self.variables.truncate(base);
        self.add(Opcode::Pops)
    }

    /// Registers `name` in the innermost scope and returns its absolute index.
    /// Does not emit code; the caller follows with `CVAR`/`CMVAR`.
    pub fn declare_variable(&mut self, name: &str, mutable: bool) -> AsmResult<u64> {
        let base = self.scopes.last().copied().unwrap_or(0);
        if self.variables[base..].iter().any(|v| v.name == name) {
            return Err(AsmError::DuplicateName { name: name.to_string() });
        }
        self.variables.push(Variable { name: name.to_string(), mutable });
        Ok((self.variables.len() - 1) as u64)
    }

    /// Searches innermost scope outward.
    pub fn resolve_variable(&self, name: &str) -> AsmResult<Binding> {
        self.variables
            .iter()
            .enumerate()
            .rev()
            .find(|(_, v)| v.name == name)
            .map(|(i, v)| Binding { index: i as u64, mutable: v.mutable })
            .ok_or_else(|| AsmError::UnknownName { name: name.to_string() })
    }

    // ── Finishing ────────────────────────────────────────────────────

    /// Patches every label reference and discards the label table.
    pub fn finalize(mut self) -> AsmResult<Program> {
        for (index, slot) in self.labels.iter().enumerate() {
            let Some(address) = slot.address else {
                return Err(AsmError::UnresolvedLabel { label: index, name: slot.name.clone() });
            };
            for &site in &slot.sites {
                tracing::trace!(label = index, site, address, "patching label reference");
                self.code[site..site + 8].copy_from_slice(&address.to_le_bytes());
            }
        }
        tracing::debug!(
            code_len = self.code.len(),
            strings = self.strings.len(),
            labels = self.labels.len(),
            "program finalized"
        );
        Ok(Program { code: self.code, strings: self.strings })
    }

    /// Finalizes and encodes as a ZB container.
    pub fn serialize(self) -> AsmResult<Vec<u8>> {
        Ok(self.finalize()?.to_bytes())
    }

    /// Reads a ZB container back into a program.
    pub fn deserialize(bytes: &[u8]) -> Result<Program, FormatError> {
        Program::from_bytes(bytes)
    }
}
