//! C6: the open-addressed `Identifier* -> slot index` hash used by every
//! [`crate::shape::internal_class::InternalClass`] (spec §4.5).
//!
//! Table sizes are drawn from `2^n + prime_delta[n]`, reproduced verbatim
//! from the original implementation (resolving spec.md's silence on the
//! exact prime sequence — see `original_source/qv4internalclass.cpp`).
//! Because shapes share a table by `Rc`, any insert that would disturb a
//! table still referenced by another shape clones first (copy-on-write),
//! mirroring [`crate::shape::shared_array::SharedArray`].

use crate::shape::identifier::Identifier;
use std::rc::Rc;

/// `primeForNumBits(n) = (1 << n) + prime_deltas[n]`, verbatim from the
/// original source.
const PRIME_DELTAS: [u8; 32] = [
    0, 0, 1, 3, 1, 5, 3, 3, 1, 9, 7, 5, 3, 9, 25, 3, 1, 21, 3, 21, 7, 15, 9, 5, 3, 29, 15, 0, 0, 0,
    0, 0,
];

fn prime_for_num_bits(num_bits: u32) -> usize {
    (1usize << num_bits) + PRIME_DELTAS[num_bits as usize] as usize
}

const MIN_NUM_BITS: u32 = 4;

#[derive(Clone)]
struct Entry {
    identifier: Identifier,
    slot: usize,
}

struct PropertyHashData {
    entries: Vec<Option<Entry>>,
    num_bits: u32,
    size: usize,
}

impl Clone for PropertyHashData {
    fn clone(&self) -> Self {
        PropertyHashData {
            entries: self.entries.clone(),
            num_bits: self.num_bits,
            size: self.size,
        }
    }
}

impl PropertyHashData {
    fn with_bits(num_bits: u32) -> PropertyHashData {
        let alloc = prime_for_num_bits(num_bits);
        PropertyHashData {
            entries: vec![None; alloc],
            num_bits,
            size: 0,
        }
    }

    fn alloc(&self) -> usize {
        self.entries.len()
    }

    fn lookup(&self, id: &Identifier) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let alloc = self.alloc();
        let mut idx = (id.hash_value() as usize) % alloc;
        loop {
            match &self.entries[idx] {
                None => return None,
                Some(e) if Identifier::ptr_eq(&e.identifier, id) => return Some(e.slot),
                Some(_) => idx = (idx + 1) % alloc,
            }
        }
    }

    fn raw_insert(&mut self, identifier: Identifier, slot: usize) {
        let alloc = self.alloc();
        let mut idx = (identifier.hash_value() as usize) % alloc;
        while self.entries[idx].is_some() {
            idx = (idx + 1) % alloc;
        }
        self.entries[idx] = Some(Entry { identifier, slot });
    }

    fn insert(&mut self, identifier: Identifier, slot: usize) {
        // Load-factor target: resize when alloc <= size*2 (spec §4.5).
        if self.alloc() <= (self.size + 1) * 2 {
            self.grow();
        }
        self.raw_insert(identifier, slot);
        self.size += 1;
    }

    fn grow(&mut self) {
        let mut num_bits = self.num_bits;
        let target = (self.size + 1) * 2;
        while prime_for_num_bits(num_bits) <= target {
            num_bits += 1;
        }
        let mut grown = PropertyHashData::with_bits(num_bits);
        for entry in self.entries.drain(..).flatten() {
            grown.raw_insert(entry.identifier, entry.slot);
        }
        grown.size = self.size;
        *self = grown;
    }

    /// Rebuild into a table sized for `class_size`, dropping entries
    /// whose slot index has fallen out of range (spec §4.5: "rebuild
    /// into a fresh table sized to the current class, dropping entries
    /// whose slot index >= classSize").
    fn shrink_to(&self, class_size: usize) -> PropertyHashData {
        let mut num_bits = MIN_NUM_BITS;
        while prime_for_num_bits(num_bits) <= class_size * 2 {
            num_bits += 1;
        }
        let mut rebuilt = PropertyHashData::with_bits(num_bits);
        for entry in self.entries.iter().flatten() {
            if entry.slot < class_size {
                rebuilt.raw_insert(entry.identifier.clone(), entry.slot);
                rebuilt.size += 1;
            }
        }
        rebuilt
    }
}

/// A refcounted, copy-on-write property hash. Cloning is cheap; mutation
/// clones the backing table only if it is shared.
#[derive(Clone)]
pub struct PropertyHash(Rc<PropertyHashData>);

impl PropertyHash {
    pub fn new() -> PropertyHash {
        PropertyHash(Rc::new(PropertyHashData::with_bits(MIN_NUM_BITS)))
    }

    pub fn lookup(&self, id: &Identifier) -> Option<usize> {
        self.0.lookup(id)
    }

    /// Returns a new table with `(identifier, slot)` inserted, cloning
    /// the backing storage first if another shape still shares it.
    pub fn inserted(&self, identifier: Identifier, slot: usize) -> PropertyHash {
        let mut data = (*self.0).clone();
        data.insert(identifier, slot);
        PropertyHash(Rc::new(data))
    }

    /// Rebuild sized for `class_size`, dropping out-of-range entries.
    /// Used after `removeMember` shrinks the owning class (spec §4.5).
    pub fn shrunk_to(&self, class_size: usize) -> PropertyHash {
        PropertyHash(Rc::new(self.0.shrink_to(class_size)))
    }

    pub fn len(&self) -> usize {
        self.0.size
    }

    pub fn is_empty(&self) -> bool {
        self.0.size == 0
    }
}

impl Default for PropertyHash {
    fn default() -> Self {
        PropertyHash::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::identifier::IdentifierTable;

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut table = IdentifierTable::new();
        let id = table.identifier("x");
        let hash = PropertyHash::new().inserted(id.clone(), 0);
        assert_eq!(hash.lookup(&id), Some(0));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table = IdentifierTable::new();
        let mut hash = PropertyHash::new();
        let mut ids = Vec::new();
        for i in 0..64 {
            let id = table.identifier(&format!("p{i}"));
            hash = hash.inserted(id.clone(), i);
            ids.push(id);
        }
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(hash.lookup(id), Some(i));
        }
    }

    #[test]
    fn shrink_drops_out_of_range_slots() {
        let mut table = IdentifierTable::new();
        let a = table.identifier("a");
        let b = table.identifier("b");
        let hash = PropertyHash::new().inserted(a.clone(), 0).inserted(b.clone(), 1);
        let shrunk = hash.shrunk_to(1);
        assert_eq!(shrunk.lookup(&a), Some(0));
        assert_eq!(shrunk.lookup(&b), None);
    }

    #[test]
    fn cow_insert_does_not_mutate_parent() {
        let mut table = IdentifierTable::new();
        let a = table.identifier("a");
        let base = PropertyHash::new();
        let child = base.inserted(a.clone(), 0);
        assert_eq!(base.lookup(&a), None);
        assert_eq!(child.lookup(&a), Some(0));
    }
}
