//! C6: identifier interning.
//!
//! An [`Identifier`] is an immutable, interned property name: pointer
//! identity stands in for semantic equality everywhere downstream (the
//! shape DAG, the property hash). The teacher's raw interned-pointer
//! model becomes `Rc<IdentifierData>` here, with `Rc::ptr_eq` as the
//! pointer-identity check (Testable Property 5: `identifier(s) ==
//! identifier(s)` for the same string).

use std::collections::HashMap;
use std::rc::Rc;

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum IdentifierKind {
    String,
    UInt,
    ArrayIndex,
}

pub struct IdentifierData {
    pub text: String,
    pub hash_value: u32,
    pub kind: IdentifierKind,
}

/// An interned property name. Cloning is cheap (`Rc` bump); equality is
/// pointer equality, not string comparison.
#[derive(Clone)]
pub struct Identifier(Rc<IdentifierData>);

impl Identifier {
    pub fn text(&self) -> &str {
        &self.0.text
    }

    pub fn hash_value(&self) -> u32 {
        self.0.hash_value
    }

    pub fn kind(&self) -> IdentifierKind {
        self.0.kind
    }

    #[inline]
    pub fn ptr_eq(a: &Identifier, b: &Identifier) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Used as a hashtable key: the `Rc`'s heap address, stable for the
    /// lifetime of the interned identifier.
    #[inline]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        Identifier::ptr_eq(self, other)
    }
}
impl Eq for Identifier {}

fn hash_str(s: &str) -> u32 {
    // FNV-1a: cheap, deterministic, and matches the teacher's preference
    // for a non-cryptographic string hash over std's randomized default.
    let mut hash: u32 = 0x811c9dc5;
    for byte in s.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn classify(s: &str) -> IdentifierKind {
    if s.is_empty() {
        return IdentifierKind::String;
    }
    if let Ok(n) = s.parse::<u32>() {
        if n.to_string() == s {
            return if n < u32::MAX {
                IdentifierKind::ArrayIndex
            } else {
                IdentifierKind::UInt
            };
        }
    }
    IdentifierKind::String
}

/// The engine-owned interning table. One per engine, lives for the
/// engine's lifetime (spec §3 "Lifecycle").
#[derive(Default)]
pub struct IdentifierTable {
    table: HashMap<String, Identifier>,
}

impl IdentifierTable {
    pub fn new() -> IdentifierTable {
        IdentifierTable {
            table: HashMap::new(),
        }
    }

    pub fn identifier(&mut self, text: &str) -> Identifier {
        if let Some(existing) = self.table.get(text) {
            return existing.clone();
        }
        let data = IdentifierData {
            text: text.to_string(),
            hash_value: hash_str(text),
            kind: classify(text),
        };
        let id = Identifier(Rc::new(data));
        self.table.insert(text.to_string(), id.clone());
        id
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_stable_pointer_identity() {
        let mut table = IdentifierTable::new();
        let a = table.identifier("foo");
        let b = table.identifier("foo");
        assert!(Identifier::ptr_eq(&a, &b));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn distinct_strings_intern_distinct_identifiers() {
        let mut table = IdentifierTable::new();
        let a = table.identifier("foo");
        let b = table.identifier("bar");
        assert!(!Identifier::ptr_eq(&a, &b));
    }

    #[test]
    fn classifies_array_indices() {
        let mut table = IdentifierTable::new();
        assert_eq!(table.identifier("0").kind(), IdentifierKind::ArrayIndex);
        assert_eq!(table.identifier("name").kind(), IdentifierKind::String);
        assert_eq!(table.identifier("01").kind(), IdentifierKind::String);
    }
}
