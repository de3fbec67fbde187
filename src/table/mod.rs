//! Associative container keyed by [`Value`] with per-entry flags and an
//! optional prototype consulted on lookup miss.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::{Value, ValueError, ValueResult};

/// Longest prototype chain `lookup` will follow before giving up.
pub const MAX_PROTOTYPE_DEPTH: usize = 256;

/// Per-entry visibility and mutability bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const PUBLIC: Flags = Flags(0b01);
    pub const MUTABLE: Flags = Flags(0b10);
    /// Flags assumed by elided-flags construction and by `SET`.
    pub const DEFAULT: Flags = Flags(0b11);

    /// Accepts only the two defined bits.
    pub fn from_bits(bits: u8) -> Option<Flags> {
        if bits & !0b11 == 0 { Some(Flags(bits)) } else { None }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// A value that has been checked to be hashable, with its hash cached.
#[derive(Debug, Clone)]
struct Key {
    value: Value,
    hash: u64,
}

impl Key {
    fn new(value: Value) -> ValueResult<Key> {
        let hash = value.hash()?;
        Ok(Key { value, hash })
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value.equals(&other.value)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub flags: Flags,
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: IndexMap<Key, Entry>,
    prototype: Option<Value>,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the entry matching `key`.
    ///
    /// Numbers compare with an epsilon but hash by their bits, so a number
    /// that misses the hashed probe falls back to a scan over numeric keys.
    fn position(&self, key: &Key) -> Option<usize> {
        self.entries.get_index_of(key).or_else(|| match key.value {
            Value::Number(_) => self.entries.keys().position(|k| k.value.equals(&key.value)),
            _ => None,
        })
    }

    /// Inserts or overwrites. The MUTABLE flag of an existing entry is not
    /// consulted.
    pub fn set(&mut self, key: Value, value: Value, flags: Flags) -> ValueResult<()> {
        let key = Key::new(key)?;
        match self.position(&key).and_then(|i| self.entries.get_index_mut(i)) {
            Some((_, entry)) => *entry = Entry { value, flags },
            None => {
                self.entries.insert(key, Entry { value, flags });
            }
        }
        Ok(())
    }

    /// Own entry only; the prototype is not consulted.
    pub fn get_own(&self, key: &Value) -> ValueResult<Option<&Entry>> {
        let key = Key::new(key.clone())?;
        Ok(self.position(&key).and_then(|i| self.entries.get_index(i)).map(|(_, e)| e))
    }

    pub fn contains(&self, key: &Value) -> ValueResult<bool> {
        Ok(self.get_own(key)?.is_some())
    }

    pub fn flags(&self, key: &Value) -> ValueResult<Option<Flags>> {
        Ok(self.get_own(key)?.map(|e| e.flags))
    }

    /// Own entry, then the prototype chain.
    pub fn get(&self, key: &Value) -> ValueResult<Value> {
        if let Some(entry) = self.get_own(key)? {
            return Ok(entry.value.clone());
        }
        match &self.prototype {
            Some(Value::Table(proto)) => Table::lookup_depth(proto, key, 1),
            Some(other) => other.get(key),
            None => Err(ValueError::KeyNotFound { key: key.render() }),
        }
    }

    /// Chain lookup starting from a shared table.
    pub fn lookup(table: &Rc<RefCell<Table>>, key: &Value) -> ValueResult<Value> {
        Table::lookup_depth(table, key, 0)
    }

    fn lookup_depth(
        table: &Rc<RefCell<Table>>,
        key: &Value,
        mut depth: usize,
    ) -> ValueResult<Value> {
        let mut current = Rc::clone(table);
        loop {
            let next = {
                let t = current.borrow();
                if let Some(entry) = t.get_own(key)? {
                    return Ok(entry.value.clone());
                }
                match &t.prototype {
                    Some(Value::Table(proto)) => Rc::clone(proto),
                    Some(other) => return other.get(key),
                    None => return Err(ValueError::KeyNotFound { key: key.render() }),
                }
            };
            depth += 1;
            if depth > MAX_PROTOTYPE_DEPTH {
                return Err(ValueError::PrototypeChainTooDeep { limit: MAX_PROTOTYPE_DEPTH });
            }
            current = next;
        }
    }

    pub fn delete(&mut self, key: &Value) -> ValueResult<Value> {
        let k = Key::new(key.clone())?;
        self.position(&k)
            .and_then(|i| self.entries.shift_remove_index(i))
            .map(|(_, e)| e.value)
            .ok_or_else(|| ValueError::KeyNotFound { key: key.render() })
    }

    pub fn set_prototype(&mut self, prototype: Value) {
        self.prototype = Some(prototype);
    }

    pub fn prototype(&self) -> Option<&Value> {
        self.prototype.as_ref()
    }

    /// `(key, entry)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Entry)> {
        self.entries.iter().map(|(k, e)| (&k.value, e))
    }

    pub(crate) fn same_entries(&self, other: &Table, active: &mut Vec<(usize, usize)>) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(k, e)| {
                other
                    .position(k)
                    .and_then(|i| other.entries.get_index(i))
                    .is_some_and(|(_, o)| e.value.equals_in(&o.value, active))
            })
    }

    pub(crate) fn render_into(&self, out: &mut String, open: &mut Vec<usize>) {
        out.push('{');
        let mut first = true;
        for (key, entry) in self.iter().filter(|(_, e)| e.flags.contains(Flags::PUBLIC)) {
            if !first {
                out.push_str(", ");
            }
            first = false;
            key.render_into(out, open);
            out.push_str(": ");
            entry.value.render_into(out, open);
        }
        out.push('}');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(table: Table) -> Rc<RefCell<Table>> {
        Rc::new(RefCell::new(table))
    }

    #[test]
    fn set_then_get() {
        let mut t = Table::new();
        t.set(Value::string("a"), Value::Number(1.0), Flags::DEFAULT).unwrap();
        t.set(Value::Number(2.0), Value::Bool(true), Flags::PUBLIC).unwrap();
        assert_eq!(t.get(&Value::string("a")), Ok(Value::Number(1.0)));
        assert_eq!(t.get(&Value::Number(2.0)), Ok(Value::Bool(true)));
        assert_eq!(t.flags(&Value::Number(2.0)), Ok(Some(Flags::PUBLIC)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn overwrite_ignores_mutable_flag() {
        let mut t = Table::new();
        t.set(Value::string("k"), Value::Number(1.0), Flags::PUBLIC).unwrap();
        t.set(Value::string("k"), Value::Number(2.0), Flags::PUBLIC).unwrap();
        assert_eq!(t.get(&Value::string("k")), Ok(Value::Number(2.0)));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn missing_key_without_prototype_is_an_error() {
        let t = Table::new();
        assert_eq!(
            t.get(&Value::string("k")),
            Err(ValueError::KeyNotFound { key: "k".to_string() })
        );
    }

    #[test]
    fn prototype_fallback() {
        let proto = Value::table(Table::new());
        proto.set(Value::string("k"), Value::Number(5.0)).unwrap();
        let mut t = Table::new();
        t.set_prototype(proto.clone());
        assert_eq!(t.get(&Value::string("k")), Ok(Value::Number(5.0)));

        // own entries shadow the prototype
        t.set(Value::string("k"), Value::Number(6.0), Flags::DEFAULT).unwrap();
        assert_eq!(t.get(&Value::string("k")), Ok(Value::Number(6.0)));
        assert!(matches!(t.get(&Value::string("x")), Err(ValueError::KeyNotFound { .. })));
    }

    #[test]
    fn prototype_changes_are_visible() {
        let proto = Value::table(Table::new());
        let child = Value::table(Table::new());
        if let Value::Table(c) = &child {
            c.borrow_mut().set_prototype(proto.clone());
        }
        proto.set(Value::string("late"), Value::Bool(true)).unwrap();
        assert_eq!(child.get(&Value::string("late")), Ok(Value::Bool(true)));
    }

    #[test]
    fn cyclic_prototype_chain_is_bounded() {
        let a = shared(Table::new());
        let b = shared(Table::new());
        a.borrow_mut().set_prototype(Value::Table(Rc::clone(&b)));
        b.borrow_mut().set_prototype(Value::Table(Rc::clone(&a)));
        assert_eq!(
            Table::lookup(&a, &Value::string("missing")),
            Err(ValueError::PrototypeChainTooDeep { limit: MAX_PROTOTYPE_DEPTH })
        );
        // break the cycle so both tables are freed
        b.borrow_mut().prototype = None;
    }

    #[test]
    fn array_prototype_is_consulted_through_get() {
        let mut t = Table::new();
        t.set_prototype(Value::array(vec![Value::string("zero")]));
        assert_eq!(t.get(&Value::Number(0.0)), Ok(Value::string("zero")));
    }

    #[test]
    fn composite_keys_fail_at_use() {
        let mut t = Table::new();
        let err = t.set(Value::array(vec![]), Value::Nil, Flags::DEFAULT);
        assert!(matches!(err, Err(ValueError::NotHashable { .. })));
        assert!(matches!(t.get(&Value::table(Table::new())), Err(ValueError::NotHashable { .. })));
    }

    #[test]
    fn nearly_equal_number_keys_share_an_entry() {
        let sum = 0.1 + 0.2;
        assert_ne!(Value::Number(sum).hash(), Value::Number(0.3).hash());

        let mut t = Table::new();
        t.set(Value::Number(0.3), Value::string("a"), Flags::DEFAULT).unwrap();
        assert_eq!(t.get(&Value::Number(sum)), Ok(Value::string("a")));
        assert_eq!(t.contains(&Value::Number(sum)), Ok(true));

        t.set(Value::Number(sum), Value::string("b"), Flags::PUBLIC).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(&Value::Number(0.3)), Ok(Value::string("b")));
        assert_eq!(t.flags(&Value::Number(0.3)), Ok(Some(Flags::PUBLIC)));

        assert_eq!(t.delete(&Value::Number(sum)), Ok(Value::string("b")));
        assert!(t.is_empty());
    }

    #[test]
    fn delete_preserves_order() {
        let mut t = Table::new();
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            t.set(Value::string(*k), Value::Number(i as f64), Flags::DEFAULT).unwrap();
        }
        assert_eq!(t.delete(&Value::string("b")), Ok(Value::Number(1.0)));
        assert!(matches!(t.delete(&Value::string("b")), Err(ValueError::KeyNotFound { .. })));
        assert_eq!(Value::table(t).render(), r#"{"a": 0, "c": 2}"#);
    }

    #[test]
    fn render_hides_private_entries() {
        let mut t = Table::new();
        t.set(Value::string("shown"), Value::Number(1.0), Flags::PUBLIC).unwrap();
        t.set(Value::string("hidden"), Value::Number(2.0), Flags::MUTABLE).unwrap();
        assert_eq!(Value::table(t).render(), r#"{"shown": 1}"#);
    }

    #[test]
    fn flags_from_bits() {
        assert_eq!(Flags::from_bits(3), Some(Flags::PUBLIC | Flags::MUTABLE));
        assert_eq!(Flags::from_bits(4), None);
        assert!(Flags::DEFAULT.contains(Flags::MUTABLE));
        assert!(!Flags::PUBLIC.contains(Flags::MUTABLE));
    }

    #[test]
    fn structural_table_equality() {
        let make = || {
            let mut t = Table::new();
            t.set(Value::string("x"), Value::Number(1.0), Flags::DEFAULT).unwrap();
            Value::table(t)
        };
        assert!(make().equals(&make()));
        let other = make();
        other.set(Value::string("y"), Value::Nil).unwrap();
        assert!(!make().equals(&other));
    }
}
