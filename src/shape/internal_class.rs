//! C7: the shape / hidden-class transition DAG (spec §4.6).
//!
//! Every object's layout is described by a canonical `InternalClass`
//! node. Two objects that underwent the same ordered sequence of
//! `add_member`/`change_member`/`remove_member`/`change_vtable` calls
//! share the same node (Testable Property 3) — `transitions` is the
//! memoization table that makes that true, and `InternalClass` equality
//! is pointer equality (`Rc::ptr_eq`), never structural comparison.

use crate::heap::header::ManagedVtable;
use crate::shape::identifier::Identifier;
use crate::shape::property_hash::PropertyHash;
use crate::shape::shared_array::SharedArray;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// `{writable, enumerable, configurable, accessor/data, isResolved}`
/// (spec §3).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PropertyAttributes(u8);

impl PropertyAttributes {
    pub const WRITABLE: u8 = 1 << 0;
    pub const ENUMERABLE: u8 = 1 << 1;
    pub const CONFIGURABLE: u8 = 1 << 2;
    pub const ACCESSOR: u8 = 1 << 3;
    pub const RESOLVED: u8 = 1 << 4;

    pub const EMPTY: PropertyAttributes = PropertyAttributes(0);

    pub fn data(writable: bool, enumerable: bool, configurable: bool) -> PropertyAttributes {
        let mut bits = Self::RESOLVED;
        if writable {
            bits |= Self::WRITABLE;
        }
        if enumerable {
            bits |= Self::ENUMERABLE;
        }
        if configurable {
            bits |= Self::CONFIGURABLE;
        }
        PropertyAttributes(bits)
    }

    pub fn accessor(enumerable: bool, configurable: bool) -> PropertyAttributes {
        let mut bits = Self::RESOLVED | Self::ACCESSOR;
        if enumerable {
            bits |= Self::ENUMERABLE;
        }
        if configurable {
            bits |= Self::CONFIGURABLE;
        }
        PropertyAttributes(bits)
    }

    #[inline]
    pub fn is_accessor(self) -> bool {
        self.0 & Self::ACCESSOR != 0
    }
    #[inline]
    pub fn writable(self) -> bool {
        self.0 & Self::WRITABLE != 0
    }
    #[inline]
    pub fn enumerable(self) -> bool {
        self.0 & Self::ENUMERABLE != 0
    }
    #[inline]
    pub fn configurable(self) -> bool {
        self.0 & Self::CONFIGURABLE != 0
    }

    #[inline]
    pub fn with_configurable(self, value: bool) -> PropertyAttributes {
        PropertyAttributes(if value {
            self.0 | Self::CONFIGURABLE
        } else {
            self.0 & !Self::CONFIGURABLE
        })
    }

    #[inline]
    pub fn with_writable(self, value: bool) -> PropertyAttributes {
        PropertyAttributes(if value {
            self.0 | Self::WRITABLE
        } else {
            self.0 & !Self::WRITABLE
        })
    }

    #[inline]
    fn flags(self) -> u8 {
        self.0
    }
}

/// Transition DAG edge key (spec §3 "Transition key"). Derived
/// `Hash`/`Eq` stand in for the original's custom hash mixing (multiply
/// the vtable pointer, xor the identifier hash with attribute flags) —
/// a `HashMap` only needs `a == b => hash(a) == hash(b)`, and structural
/// derive gives that for free without replicating the original's
/// specific integer mixing, which existed to suit a hand-rolled probe
/// table rather than `std`'s.
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
enum TransitionKey {
    AddOrChange(usize, u8),
    Remove(usize),
    VTableChange(usize),
}

struct InternalClassData {
    vtable: *const ManagedVtable,
    property_table: PropertyHash,
    name_map: SharedArray<Option<Identifier>>,
    property_data: SharedArray<PropertyAttributes>,
    size: usize,
    transitions: RefCell<HashMap<TransitionKey, InternalClass>>,
    sealed: RefCell<Option<InternalClass>>,
    frozen: RefCell<Option<InternalClass>>,
    /// Set on a class produced by `frozen()`: it is its own `sealed()`
    /// sibling (spec §4.6 "frozen also sets m_frozen->m_sealed =
    /// m_frozen").
    is_own_sealed: std::cell::Cell<bool>,
    /// The size-0 class every rebuild path (`change_member`,
    /// `remove_member`, `sealed`, `frozen`) replays onto. `None` means
    /// this node *is* one (there is one per vtable family); `Some`
    /// propagates the same node down through every descendant so
    /// unrelated shapes that rebuild to the same member set land on the
    /// identical cached transition rather than a fresh, merely
    /// structurally-equal one (spec Invariant 1: canonicalization).
    empty_root: Option<InternalClass>,
}

/// A canonical shape node. Cheap to clone (`Rc` bump); equality is
/// pointer identity.
#[derive(Clone)]
pub struct InternalClass(Rc<InternalClassData>);

impl PartialEq for InternalClass {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for InternalClass {}

impl InternalClass {
    pub fn empty(vtable: &'static ManagedVtable) -> InternalClass {
        InternalClass(Rc::new(InternalClassData {
            vtable: vtable as *const ManagedVtable,
            property_table: PropertyHash::new(),
            name_map: SharedArray::new(),
            property_data: SharedArray::new(),
            size: 0,
            transitions: RefCell::new(HashMap::new()),
            sealed: RefCell::new(None),
            frozen: RefCell::new(None),
            is_own_sealed: std::cell::Cell::new(false),
            empty_root: None,
        }))
    }

    pub fn size(&self) -> usize {
        self.0.size
    }

    pub fn vtable(&self) -> *const ManagedVtable {
        self.0.vtable
    }

    pub fn find(&self, id: &Identifier) -> Option<(usize, PropertyAttributes)> {
        let slot = self.0.property_table.lookup(id)?;
        let attrs = *self.0.property_data.get(slot)?;
        Some((slot, attrs))
    }

    /// In-order `(name, attrs)` pairs for every *primary* slot (skips the
    /// synthetic null-identifier companion slot an accessor property
    /// occupies; `add_member` recreates it automatically).
    fn member_slots(&self) -> Vec<(Identifier, PropertyAttributes)> {
        self.0
            .name_map
            .as_slice()
            .iter()
            .zip(self.0.property_data.as_slice())
            .filter_map(|(name, attrs)| name.clone().map(|n| (n, *attrs)))
            .collect()
    }

    fn transition(&self, key: TransitionKey) -> Option<InternalClass> {
        self.0.transitions.borrow().get(&key).cloned()
    }

    fn install_transition(&self, key: TransitionKey, child: InternalClass) {
        self.0.transitions.borrow_mut().insert(key, child);
    }

    /// spec §4.6 `addMember`.
    pub fn add_member(&self, id: Identifier, attrs: PropertyAttributes) -> InternalClass {
        if self.find(&id).is_some() {
            return self.change_member(&id, attrs);
        }
        let key = TransitionKey::AddOrChange(id.identity(), attrs.flags());
        if let Some(existing) = self.transition(key) {
            return existing;
        }
        let child = self.add_member_impl(id, attrs);
        self.install_transition(key, child.clone());
        child
    }

    fn add_member_impl(&self, id: Identifier, attrs: PropertyAttributes) -> InternalClass {
        let slot = self.0.size;
        let mut name_map = self.0.name_map.pushed(Some(id.clone()));
        let mut property_data = self.0.property_data.pushed(attrs);
        let property_table = self.0.property_table.inserted(id, slot);
        let mut size = slot + 1;

        if attrs.is_accessor() {
            // Accessor properties occupy two consecutive slots; the
            // second carries no identifier and empty attributes (spec
            // Invariant 4). It is never addressed by name, so it has no
            // entry in `property_table`.
            name_map = name_map.pushed(None);
            property_data = property_data.pushed(PropertyAttributes::EMPTY);
            size += 1;
        }

        InternalClass(Rc::new(InternalClassData {
            vtable: self.0.vtable,
            property_table,
            name_map,
            property_data,
            size,
            transitions: RefCell::new(HashMap::new()),
            sealed: RefCell::new(None),
            frozen: RefCell::new(None),
            is_own_sealed: std::cell::Cell::new(false),
            empty_root: Some(self.empty_ancestor()),
        }))
    }

    /// spec §4.6 `changeMember`. The attribute-change path rebuilds from
    /// the engine's empty class and replays every member, substituting
    /// the new attributes at the changed slot — this is the documented
    /// O(n²)-in-pathological-cases path (spec §9 Open Questions); it is
    /// not memoized here, preserving observable canonicalization rather
    /// than optimizing the rebuild.
    pub fn change_member(&self, id: &Identifier, new_attrs: PropertyAttributes) -> InternalClass {
        let (_, old_attrs) = self.find(id).expect("changeMember on absent property");
        if old_attrs == new_attrs {
            return self.clone();
        }
        let key = TransitionKey::AddOrChange(id.identity(), new_attrs.flags());
        if let Some(existing) = self.transition(key) {
            return existing;
        }

        let empty = self.empty_ancestor();
        let mut rebuilt = empty.change_vtable_from_empty(self.0.vtable);
        for (name, attrs) in self.member_slots() {
            let attrs = if Identifier::ptr_eq(&name, id) {
                new_attrs
            } else {
                attrs
            };
            rebuilt = rebuilt.add_member(name, attrs);
        }
        self.install_transition(key, rebuilt.clone());
        rebuilt
    }

    /// spec §4.6 `removeMember`. Drops the duplicate backward edge the
    /// original installs on `oldClass` in addition to the new class
    /// (spec §9 Open Questions: "Implementer may choose to drop this
    /// duplicate without changing observable behavior").
    pub fn remove_member(&self, id: &Identifier) -> InternalClass {
        let key = TransitionKey::Remove(id.identity());
        if let Some(existing) = self.transition(key) {
            return existing;
        }

        let empty = self.empty_ancestor();
        let mut rebuilt = empty.change_vtable_from_empty(self.0.vtable);
        for (name, attrs) in self.member_slots() {
            if Identifier::ptr_eq(&name, id) {
                continue;
            }
            rebuilt = rebuilt.add_member(name, attrs);
        }
        self.install_transition(key, rebuilt.clone());
        rebuilt
    }

    /// spec §4.6 `changeVTable`.
    pub fn change_vtable(&self, vtable: &'static ManagedVtable) -> InternalClass {
        let key = TransitionKey::VTableChange(vtable as *const ManagedVtable as usize);
        if let Some(existing) = self.transition(key) {
            return existing;
        }
        let child = if self.0.size == 0 {
            // This node is itself an empty class; cloning it into a new
            // vtable family makes the clone the root of that family.
            InternalClass(Rc::new(InternalClassData {
                vtable: vtable as *const ManagedVtable,
                property_table: self.0.property_table.clone(),
                name_map: self.0.name_map.clone(),
                property_data: self.0.property_data.clone(),
                size: 0,
                transitions: RefCell::new(HashMap::new()),
                sealed: RefCell::new(None),
                frozen: RefCell::new(None),
                is_own_sealed: std::cell::Cell::new(false),
                empty_root: None,
            }))
        } else {
            let empty = self.empty_ancestor();
            let mut rebuilt = empty.change_vtable_from_empty(vtable as *const ManagedVtable);
            for (name, attrs) in self.member_slots() {
                rebuilt = rebuilt.add_member(name, attrs);
            }
            rebuilt
        };
        self.install_transition(key, child.clone());
        child
    }

    /// Internal helper used by the rebuild paths: `self` is assumed to
    /// already be the engine's canonical empty class for its vtable
    /// family. Returns the (possibly cached) empty class for `vtable`,
    /// creating a brand new empty-class root only the first time a given
    /// vtable is seen from this family.
    fn change_vtable_from_empty(&self, vtable: *const ManagedVtable) -> InternalClass {
        debug_assert_eq!(self.0.size, 0);
        if self.0.vtable == vtable {
            return self.clone();
        }
        let key = TransitionKey::VTableChange(vtable as usize);
        if let Some(existing) = self.transition(key) {
            return existing;
        }
        let child = InternalClass(Rc::new(InternalClassData {
            vtable,
            property_table: PropertyHash::new(),
            name_map: SharedArray::new(),
            property_data: SharedArray::new(),
            size: 0,
            transitions: RefCell::new(HashMap::new()),
            sealed: RefCell::new(None),
            frozen: RefCell::new(None),
            is_own_sealed: std::cell::Cell::new(false),
            empty_root: None,
        }));
        self.install_transition(key, child.clone());
        child
    }

    /// The canonical size-0 node every rebuild path replays onto (spec
    /// §4.6's `emptyClass`). Every node reachable from a real
    /// `InternalClass::empty()` carries a propagated reference to it, so
    /// unrelated shapes that rebuild to the same member set land on
    /// literally the same `Rc`, not merely a structurally equal one
    /// (spec Invariant 1).
    fn empty_ancestor(&self) -> InternalClass {
        match &self.0.empty_root {
            Some(root) => root.clone(),
            None => self.clone(),
        }
    }

    /// spec §4.6 `sealed()`: every property has `configurable = false`.
    pub fn sealed(&self) -> InternalClass {
        if let Some(cached) = self.0.sealed.borrow().clone() {
            return cached;
        }
        let empty = self.empty_ancestor();
        let mut rebuilt = empty;
        for (name, attrs) in self.member_slots() {
            rebuilt = rebuilt.add_member(name, attrs.with_configurable(false));
        }
        *self.0.sealed.borrow_mut() = Some(rebuilt.clone());
        rebuilt
    }

    /// spec §4.6 `frozen()`: every property has `configurable = false &&
    /// writable = false`. The result is cached as its own `sealed()`
    /// sibling, matching the original's `m_frozen->m_sealed = m_frozen`.
    pub fn frozen(&self) -> InternalClass {
        if let Some(cached) = self.0.frozen.borrow().clone() {
            return cached;
        }
        let empty = self.empty_ancestor();
        let mut rebuilt = empty;
        for (name, attrs) in self.member_slots() {
            let attrs = attrs.with_configurable(false).with_writable(false);
            rebuilt = rebuilt.add_member(name, attrs);
        }
        rebuilt.0.is_own_sealed.set(true);
        *rebuilt.0.sealed.borrow_mut() = Some(rebuilt.clone());
        *self.0.frozen.borrow_mut() = Some(rebuilt.clone());
        rebuilt
    }
}

/// Iteratively tears down `root` and everything it transitively reaches
/// through `transitions`/`sealed`/`frozen`, so engine teardown doesn't
/// recurse through an arbitrarily deep shape DAG (spec §4.6 "Teardown").
/// Only meaningful when the caller holds the last reference to `root` —
/// otherwise this just drains caches a still-live shape will happily
/// recompute.
pub fn teardown(root: InternalClass) {
    let mut worklist = vec![root];
    while let Some(class) = worklist.pop() {
        let transitions = std::mem::take(&mut *class.0.transitions.borrow_mut());
        worklist.extend(transitions.into_values());
        if let Some(s) = class.0.sealed.borrow_mut().take() {
            worklist.push(s);
        }
        if let Some(f) = class.0.frozen.borrow_mut().take() {
            worklist.push(f);
        }
    }
}
