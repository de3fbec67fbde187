use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::table::{Flags, Table};

// ── Stable hashing ───────────────────────────────────────────────────
//
// 64-bit FNV-1a. Hashes are stored in ZB files next to every pool string,
// so they must not depend on the process or the toolchain.

const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01B3;

const fn fnv1a64_mix(mut hash: u64, bytes: &[u8]) -> u64 {
    let mut i = 0usize;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV1A_PRIME_64);
        i += 1;
    }
    hash
}

fn tagged_hash(tag: Tag, payload: &[u8]) -> u64 {
    fnv1a64_mix(fnv1a64_mix(FNV1A_OFFSET_BASIS_64, &[tag as u8]), payload)
}

/// Structural hash of a string value; the string pool stores exactly this.
pub fn hash_str(s: &str) -> u64 {
    tagged_hash(Tag::String, s.as_bytes())
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("{tag} values cannot be hashed")]
    NotHashable { tag: Tag },
    #[error("{tag} values do not support indexing")]
    NotIndexable { tag: Tag },
    #[error("key not found: {key}")]
    KeyNotFound { key: String },
    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid array index {key}")]
    InvalidIndex { key: String },
    #[error("prototype chain deeper than {limit} links")]
    PrototypeChainTooDeep { limit: usize },
}

pub type ValueResult<T> = Result<T, ValueError>;

// ── Tags ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Nil = 0,
    Bool = 1,
    Number = 2,
    String = 3,
    Array = 4,
    Table = 5,
    Function = 6,
}

impl Tag {
    pub const fn name(self) -> &'static str {
        match self {
            Tag::Nil => "nil",
            Tag::Bool => "bool",
            Tag::Number => "number",
            Tag::String => "string",
            Tag::Array => "array",
            Tag::Table => "table",
            Tag::Function => "function",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Payloads ─────────────────────────────────────────────────────────

/// Shared string payload with a lazily computed structural hash.
#[derive(Debug)]
pub struct Str {
    text: String,
    hash: Cell<Option<u64>>,
}

impl Str {
    pub fn new(text: impl Into<String>) -> Self {
        Str { text: text.into(), hash: Cell::new(None) }
    }

    /// Builds a payload whose hash is already known, e.g. from the string pool.
    pub fn with_hash(text: impl Into<String>, hash: u64) -> Self {
        Str { text: text.into(), hash: Cell::new(Some(hash)) }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> u64 {
        match self.hash.get() {
            Some(h) => h,
            None => {
                let h = hash_str(&self.text);
                self.hash.set(Some(h));
                h
            }
        }
    }
}

/// A code address in a loaded program plus its declared arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    pub address: u64,
    pub arity: u16,
}

// ── Value ────────────────────────────────────────────────────────────

/// A runtime value. Cloning copies the reference, never a composite payload.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<Str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Table(Rc<RefCell<Table>>),
    Function(Function),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Rc::new(Str::new(s)))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn table(table: Table) -> Value {
        Value::Table(Rc::new(RefCell::new(table)))
    }

    pub fn function(address: u64, arity: u16) -> Value {
        Value::Function(Function { address, arity })
    }

    pub fn tag(&self) -> Tag {
        match self {
            Value::Nil => Tag::Nil,
            Value::Bool(_) => Tag::Bool,
            Value::Number(_) => Tag::Number,
            Value::String(_) => Tag::String,
            Value::Array(_) => Tag::Array,
            Value::Table(_) => Tag::Table,
            Value::Function(_) => Tag::Function,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.as_str().is_empty(),
            Value::Array(items) => !items.borrow().is_empty(),
            Value::Table(_) | Value::Function(_) => true,
        }
    }

    /// Address of the shared payload; `None` for unboxed scalars.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(addr(s)),
            Value::Array(a) => Some(addr(a)),
            Value::Table(t) => Some(addr(t)),
            _ => None,
        }
    }

    /// Structural hash. Arrays and tables are not valid keys.
    ///
    /// Numbers hash by bit pattern, so two numbers that are `equals` within
    /// epsilon may hash apart. [`Table`] rescans numeric keys on a miss.
    pub fn hash(&self) -> ValueResult<u64> {
        match self {
            Value::Nil => Ok(tagged_hash(Tag::Nil, &[])),
            Value::Bool(b) => Ok(tagged_hash(Tag::Bool, &[*b as u8])),
            Value::Number(n) => {
                // -0.0 and 0.0 compare equal, so they must hash alike
                let n = if *n == 0.0 { 0.0f64 } else { *n };
                Ok(tagged_hash(Tag::Number, &n.to_bits().to_le_bytes()))
            }
            Value::String(s) => Ok(s.hash()),
            Value::Function(f) => {
                let mut bytes = [0u8; 10];
                bytes[..8].copy_from_slice(&f.address.to_le_bytes());
                bytes[8..].copy_from_slice(&f.arity.to_le_bytes());
                Ok(tagged_hash(Tag::Function, &bytes))
            }
            Value::Array(_) | Value::Table(_) => Err(ValueError::NotHashable { tag: self.tag() }),
        }
    }

    /// Structural equality; values of different tags are never equal.
    ///
    /// Containers that reach themselves compare equal when every pair
    /// outside the cycle does.
    pub fn equals(&self, other: &Value) -> bool {
        self.equals_in(other, &mut Vec::new())
    }

    /// `active` holds the container pairs currently being compared.
    pub(crate) fn equals_in(&self, other: &Value, active: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a - b).abs() < f64::EPSILON,
            (Value::String(a), Value::String(b)) => {
                Rc::ptr_eq(a, b) || (a.hash() == b.hash() && a.as_str() == b.as_str())
            }
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                if !enter_pair((addr(a), addr(b)), active) {
                    return true;
                }
                let (xs, ys) = (a.borrow(), b.borrow());
                let same = xs.len() == ys.len()
                    && xs.iter().zip(ys.iter()).all(|(x, y)| x.equals_in(y, active));
                active.pop();
                same
            }
            (Value::Table(a), Value::Table(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                if !enter_pair((addr(a), addr(b)), active) {
                    return true;
                }
                let same = a.borrow().same_entries(&b.borrow(), active);
                active.pop();
                same
            }
            _ => false,
        }
    }

    // ── Indexed access ───────────────────────────────────────────────

    pub fn get(&self, key: &Value) -> ValueResult<Value> {
        match self {
            Value::Array(items) => {
                let index = array_index(key)?;
                let items = items.borrow();
                items
                    .get(index)
                    .cloned()
                    .ok_or(ValueError::IndexOutOfRange { index, len: items.len() })
            }
            Value::Table(table) => Table::lookup(table, key),
            _ => Err(ValueError::NotIndexable { tag: self.tag() }),
        }
    }

    /// Writes `key`. Table entries written this way are PUBLIC|MUTABLE;
    /// an array accepts `index == len` as an append.
    pub fn set(&self, key: Value, value: Value) -> ValueResult<()> {
        match self {
            Value::Array(items) => {
                let index = array_index(&key)?;
                let mut items = items.borrow_mut();
                if index < items.len() {
                    items[index] = value;
                } else if index == items.len() {
                    items.push(value);
                } else {
                    return Err(ValueError::IndexOutOfRange { index, len: items.len() });
                }
                Ok(())
            }
            Value::Table(table) => table.borrow_mut().set(key, value, Flags::DEFAULT),
            _ => Err(ValueError::NotIndexable { tag: self.tag() }),
        }
    }

    pub fn delete(&self, key: &Value) -> ValueResult<Value> {
        match self {
            Value::Array(items) => {
                let index = array_index(key)?;
                let mut items = items.borrow_mut();
                if index < items.len() {
                    Ok(items.remove(index))
                } else {
                    Err(ValueError::IndexOutOfRange { index, len: items.len() })
                }
            }
            Value::Table(table) => table.borrow_mut().delete(key),
            _ => Err(ValueError::NotIndexable { tag: self.tag() }),
        }
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Human-readable form; strings are raw at top level. A container met
    /// again inside itself prints as `[...]` or `{...}`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, &mut Vec::new());
        out
    }

    /// `open` holds the identities of the containers enclosing this value;
    /// it is empty at top level.
    pub(crate) fn render_into(&self, out: &mut String, open: &mut Vec<usize>) {
        match self {
            Value::Nil => out.push_str("nil"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&format_number(*n)),
            Value::String(s) if !open.is_empty() => out.push_str(&format!("{:?}", s.as_str())),
            Value::String(s) => out.push_str(s.as_str()),
            Value::Array(items) => {
                let Some(id) = self.identity().filter(|id| !open.contains(id)) else {
                    out.push_str("[...]");
                    return;
                };
                open.push(id);
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render_into(out, open);
                }
                out.push(']');
                open.pop();
            }
            Value::Table(table) => {
                let Some(id) = self.identity().filter(|id| !open.contains(id)) else {
                    out.push_str("{...}");
                    return;
                };
                open.push(id);
                table.borrow().render_into(out, open);
                open.pop();
            }
            Value::Function(f) => out.push_str(&format!("<fn @{}/{}>", f.address, f.arity)),
        }
    }
}

fn addr<T>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const u8 as usize
}

/// Pushes the pair unless it is already being compared.
fn enter_pair(pair: (usize, usize), active: &mut Vec<(usize, usize)>) -> bool {
    if active.contains(&pair) {
        return false;
    }
    active.push(pair);
    true
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

/// Integral values print without a fractional part; everything else uses
/// Rust's shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn array_index(key: &Value) -> ValueResult<usize> {
    match key {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= usize::MAX as f64 => {
            Ok(*n as usize)
        }
        other => Err(ValueError::InvalidIndex { key: other.render() }),
    }
}
