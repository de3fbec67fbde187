//! Finished programs and the ZB container format.
//!
//! # Container layout (little-endian)
//!
//! - bytes 0..8: [`MAGIC`] (format id + version)
//! - bytes 8..16: u64 offset of the string pool, always `16 + code.len()`
//! - bytes 16..offset: instruction bytes
//! - offset..EOF: pool entries, each a NUL-terminated UTF-8 string followed by
//!   its 8-byte structural hash

use crate::opcode::{Opcode, Operand, UnknownOpcode};
use crate::value::hash_str;

/// Format id `ZOEBC` followed by version 1.
pub const MAGIC: &[u8; 8] = b"ZOEBC\x00\x00\x01";

/// Size of the magic plus the pool offset.
pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("file is {len} bytes, shorter than the 16-byte header")]
    TruncatedHeader { len: usize },
    #[error("bad magic/version marker")]
    BadMagic,
    #[error("string pool offset {offset} outside file of {len} bytes")]
    BadPoolOffset { offset: u64, len: usize },
    #[error("string pool entry at byte {offset} is not NUL-terminated")]
    UnterminatedString { offset: usize },
    #[error("string pool entry at byte {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },
    #[error("string pool entry at byte {offset} is missing its hash")]
    TruncatedHash { offset: usize },
    #[error("string pool entry {index} has hash {stored:#018x}, expected {computed:#018x}")]
    HashMismatch { index: usize, stored: u64, computed: u64 },
}

/// One string-pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolString {
    pub text: String,
    pub hash: u64,
}

impl PoolString {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = hash_str(&text);
        PoolString { text, hash }
    }
}

/// Immutable program: resolved code plus the string pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub code: Vec<u8>,
    pub strings: Vec<PoolString>,
}

impl Program {
    pub fn string(&self, index: u32) -> Option<&PoolString> {
        self.strings.get(index as usize)
    }

    /// Encodes the program as a ZB container.
    pub fn to_bytes(&self) -> Vec<u8> {
        let pool_len: usize = self.strings.iter().map(|s| s.text.len() + 1 + 8).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + self.code.len() + pool_len);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&((HEADER_LEN + self.code.len()) as u64).to_le_bytes());
        out.extend_from_slice(&self.code);
        for s in &self.strings {
            out.extend_from_slice(s.text.as_bytes());
            out.push(0);
            out.extend_from_slice(&s.hash.to_le_bytes());
        }
        out
    }

    /// Decodes a ZB container, validating the header and every pool entry.
    pub fn from_bytes(input: &[u8]) -> Result<Program, FormatError> {
        if input.len() < HEADER_LEN {
            return Err(FormatError::TruncatedHeader { len: input.len() });
        }
        if &input[..8] != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let offset = read_u64(&input[8..16]);
        if offset < HEADER_LEN as u64 || offset > input.len() as u64 {
            return Err(FormatError::BadPoolOffset { offset, len: input.len() });
        }
        let offset = offset as usize;
        let code = input[HEADER_LEN..offset].to_vec();

        let mut strings = Vec::new();
        let mut pos = offset;
        while pos < input.len() {
            let nul = input[pos..]
                .iter()
                .position(|b| *b == 0)
                .ok_or(FormatError::UnterminatedString { offset: pos })?;
            let text = std::str::from_utf8(&input[pos..pos + nul])
                .map_err(|_| FormatError::InvalidUtf8 { offset: pos })?;
            let hash_at = pos + nul + 1;
            if hash_at + 8 > input.len() {
                return Err(FormatError::TruncatedHash { offset: pos });
            }
            let stored = read_u64(&input[hash_at..hash_at + 8]);
            let computed = hash_str(text);
            if stored != computed {
                return Err(FormatError::HashMismatch { index: strings.len(), stored, computed });
            }
            strings.push(PoolString { text: text.to_string(), hash: stored });
            pos = hash_at + 8;
        }

        tracing::debug!(code_len = code.len(), strings = strings.len(), "decoded ZB container");
        Ok(Program { code, strings })
    }

    /// Decodes the instruction starting at `offset`.
    pub fn decode(&self, offset: usize) -> Result<Instr, DecodeError> {
        decode(&self.code, offset)
    }

    /// Iterates over every instruction in code order, stopping at the first
    /// undecodable one.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { code: &self.code, offset: 0, failed: false }
    }
}

// ── Instruction decoding ─────────────────────────────────────────────

/// A decoded immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    None,
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Str(u32),
}

impl Arg {
    /// Integer view of the immediate; `None` for floats and absent operands.
    pub fn as_u64(self) -> Option<u64> {
        match self {
            Arg::U8(v) => Some(v as u64),
            Arg::U16(v) => Some(v as u64),
            Arg::U32(v) | Arg::Str(v) => Some(v as u64),
            Arg::U64(v) => Some(v),
            Arg::None | Arg::F64(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr {
    pub offset: usize,
    pub opcode: Opcode,
    pub arg: Arg,
}

impl Instr {
    /// Offset of the following instruction.
    pub fn next(&self) -> usize {
        self.offset + self.opcode.size()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{source} at offset {offset}")]
    UnknownOpcode { offset: usize, source: UnknownOpcode },
    #[error("{opcode} at offset {offset} needs {needed} operand bytes, {available} available")]
    Truncated { offset: usize, opcode: Opcode, needed: usize, available: usize },
    #[error("offset {offset} is past the end of the code")]
    OutOfBounds { offset: usize },
}

pub fn decode(code: &[u8], offset: usize) -> Result<Instr, DecodeError> {
    let byte = *code.get(offset).ok_or(DecodeError::OutOfBounds { offset })?;
    let opcode =
        Opcode::try_from(byte).map_err(|source| DecodeError::UnknownOpcode { offset, source })?;
    let operand = opcode.operand();
    let start = offset + 1;
    let available = code.len() - start;
    if available < operand.width() {
        return Err(DecodeError::Truncated { offset, opcode, needed: operand.width(), available });
    }
    let bytes = &code[start..start + operand.width()];
    let arg = match operand {
        Operand::None => Arg::None,
        Operand::U8 => Arg::U8(bytes[0]),
        Operand::U16 => Arg::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
        Operand::U32 => Arg::U32(read_u32(bytes)),
        Operand::Str => Arg::Str(read_u32(bytes)),
        Operand::U64 => Arg::U64(read_u64(bytes)),
        Operand::F64 => Arg::F64(f64::from_bits(read_u64(bytes))),
    };
    Ok(Instr { offset, opcode, arg })
}

pub struct Instructions<'a> {
    code: &'a [u8],
    offset: usize,
    failed: bool,
}

impl Iterator for Instructions<'_> {
    type Item = Result<Instr, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.code.len() {
            return None;
        }
        match decode(self.code, self.offset) {
            Ok(instr) => {
                self.offset = instr.next();
                Some(Ok(instr))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
