//! C5: root sets.
//!
//! Three root sources feed the mark phase: the JS evaluation stack, a
//! list of strong "persistent" handles, and a list of "weak" handles
//! whose survival additionally depends on a host policy. The teacher's
//! intrusive doubly/singly-linked lists (raw prev/next pointers plus a
//! hand-rolled refcount field) are replaced here with `Rc<RefCell<_>>`
//! nodes: a handle's "refcount" is just `Rc::strong_count`, so "unlink
//! when refcount hits zero" becomes "unlink when only the list's own
//! reference remains" — one fewer invariant to hand-maintain.

use crate::address::HeapPtr;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A JS value as seen by the root scanner. The full tagged/NaN-boxed
/// representation is out of scope (spec §9); this substrate only needs
/// to distinguish "points at a managed object" from "does not".
#[derive(Copy, Clone, Debug)]
pub enum TaggedValue {
    Undefined,
    Managed(HeapPtr<()>),
}

impl TaggedValue {
    #[inline]
    pub fn as_managed(&self) -> Option<HeapPtr<()>> {
        match self {
            TaggedValue::Managed(p) => Some(*p),
            TaggedValue::Undefined => None,
        }
    }
}

/// The engine's JS evaluation stack. Scanned in `[0, len)` during mark
/// (spec §4.2 step 3); the substrate's own mark stack is separate (see
/// [`crate::heap::collector::Collector`]) rather than reusing this one,
/// since nothing outside the collector needs to observe mark-stack depth
/// the way an embedded interpreter stack would.
#[derive(Default)]
pub struct JsStack {
    values: Vec<TaggedValue>,
}

impl JsStack {
    pub fn new() -> JsStack {
        JsStack { values: Vec::new() }
    }

    pub fn push(&mut self, value: TaggedValue) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> Option<TaggedValue> {
        self.values.pop()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaggedValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct PersistentNode {
    value: TaggedValue,
}

/// A strong root. While any clone of this handle is alive the value it
/// holds cannot be collected.
#[derive(Clone)]
pub struct PersistentHandle(Rc<RefCell<PersistentNode>>);

impl PersistentHandle {
    pub fn get(&self) -> TaggedValue {
        self.0.borrow().value
    }

    pub fn set(&self, value: TaggedValue) {
        self.0.borrow_mut().value = value;
    }
}

/// The engine's list of live persistent handles.
#[derive(Default)]
pub struct PersistentHandles {
    nodes: Vec<Rc<RefCell<PersistentNode>>>,
}

impl PersistentHandles {
    pub fn new() -> PersistentHandles {
        PersistentHandles { nodes: Vec::new() }
    }

    pub fn create(&mut self, value: TaggedValue) -> PersistentHandle {
        let node = Rc::new(RefCell::new(PersistentNode { value }));
        self.nodes.push(node.clone());
        PersistentHandle(node)
    }

    /// Mark every still-referenced handle and drop the ones whose only
    /// remaining owner is this list itself (spec §4.2 step 2: "if
    /// refcount==0, unlink and delete the handle; else mark the held
    /// value").
    pub fn for_each_live_mut(&mut self, mut mark: impl FnMut(HeapPtr<()>)) {
        self.nodes.retain(|node| {
            if Rc::strong_count(node) <= 1 {
                false
            } else {
                if let Some(p) = node.borrow().value.as_managed() {
                    mark(p);
                }
                true
            }
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Walks from a host object (e.g. a QObject-style wrapper) up to the
/// outermost non-null parent, re-asking the keep-alive question at each
/// level (spec §6).
pub trait HostObject {
    fn keep_alive_during_gc(&self) -> bool;
    fn parent(&self) -> Option<Rc<dyn HostObject>>;
}

pub fn host_keep_alive(host: &Rc<dyn HostObject>) -> bool {
    if host.keep_alive_during_gc() {
        return true;
    }
    let mut current = host.clone();
    loop {
        match current.parent() {
            Some(parent) => current = parent,
            None => return current.keep_alive_during_gc(),
        }
    }
}

struct WeakNode {
    value: TaggedValue,
    host: Option<Rc<dyn HostObject>>,
}

/// A weak root: survives a collection only if its value is otherwise
/// reachable, or (for host-backed values) the host keep-alive policy
/// says so. Cleared to [`TaggedValue::Undefined`] otherwise.
#[derive(Clone)]
pub struct WeakHandle(Rc<RefCell<WeakNode>>);

impl WeakHandle {
    pub fn get(&self) -> TaggedValue {
        self.0.borrow().value
    }
}

/// The engine's list of live weak handles.
#[derive(Default)]
pub struct WeakHandles {
    nodes: Vec<Rc<RefCell<WeakNode>>>,
}

impl WeakHandles {
    pub fn new() -> WeakHandles {
        WeakHandles { nodes: Vec::new() }
    }

    pub fn create(&mut self, value: TaggedValue, host: Option<Rc<dyn HostObject>>) -> WeakHandle {
        let node = Rc::new(RefCell::new(WeakNode { value, host }));
        self.nodes.push(node.clone());
        WeakHandle(node)
    }

    /// Mark phase, first pass (spec §4.2 step 4): unlink dead handles,
    /// and for host-backed live handles consult the keep-alive policy
    /// before deciding whether to mark.
    pub fn mark_pass(&mut self, mut mark: impl FnMut(HeapPtr<()>)) {
        self.nodes.retain(|node| {
            if Rc::strong_count(node) <= 1 {
                return false;
            }
            let keep = {
                let n = node.borrow();
                match &n.host {
                    Some(host) => host_keep_alive(host),
                    None => true,
                }
            };
            if keep {
                if let Some(p) = node.borrow().value.as_managed() {
                    mark(p);
                }
            }
            true
        });
    }

    /// Sweep pass (spec §4.3 step 1): any handle whose value failed to
    /// survive marking is reset to undefined and unlinked.
    pub fn sweep_pass(&mut self, is_marked: impl Fn(HeapPtr<()>) -> bool) {
        self.nodes.retain(|node| {
            if Rc::strong_count(node) <= 1 {
                return false;
            }
            let mut n = node.borrow_mut();
            if let Some(p) = n.value.as_managed() {
                if !is_marked(p) {
                    n.value = TaggedValue::Undefined;
                }
            }
            true
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Deduplicates the wrapper objects created for host objects that can be
/// reached from JS through more than one path (spec §4.3 step 2: "drop
/// entries in the multiply-wrapped-host-object map whose value has
/// markBit==0"). Without this, re-wrapping the same host object would
/// hand out two distinct JS identities for it; this map makes wrapping
/// idempotent while the wrapper is still alive, and lets sweep reclaim
/// the entry once nothing else keeps the wrapper reachable.
///
/// Keyed by host-object identity (`Rc::as_ptr` cast to `usize`), not by
/// any `Hash`/`Eq` impl on the host type itself, so any `Rc<dyn
/// HostObject>` can be deduplicated without constraining what it is.
#[derive(Default)]
pub struct HostWrapperMap {
    wrappers: HashMap<usize, HeapPtr<()>>,
}

impl HostWrapperMap {
    pub fn new() -> HostWrapperMap {
        HostWrapperMap {
            wrappers: HashMap::new(),
        }
    }

    #[inline]
    fn key(host: &Rc<dyn HostObject>) -> usize {
        Rc::as_ptr(host) as *const () as usize
    }

    /// The existing wrapper for `host`, if one was previously recorded
    /// and has not yet been swept away.
    pub fn get(&self, host: &Rc<dyn HostObject>) -> Option<HeapPtr<()>> {
        self.wrappers.get(&Self::key(host)).copied()
    }

    /// Record `wrapper` as the canonical JS wrapper for `host`. Later
    /// calls for the same host identity overwrite the previous entry.
    pub fn insert(&mut self, host: &Rc<dyn HostObject>, wrapper: HeapPtr<()>) {
        self.wrappers.insert(Self::key(host), wrapper);
    }

    /// Sweep pass (spec §4.3 step 2): drop every entry whose wrapper
    /// didn't survive marking. Must run before the wrapper's slot is
    /// reclaimed by the size-classed sweep, since `is_marked` reads the
    /// wrapper's mark bit.
    pub fn sweep(&mut self, is_marked: impl Fn(HeapPtr<()>) -> bool) {
        self.wrappers.retain(|_, wrapper| is_marked(*wrapper));
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHost;
    impl HostObject for NoHost {
        fn keep_alive_during_gc(&self) -> bool {
            false
        }
        fn parent(&self) -> Option<Rc<dyn HostObject>> {
            None
        }
    }

    #[test]
    fn persistent_handle_unlinked_when_dropped() {
        let mut handles = PersistentHandles::new();
        let h = handles.create(TaggedValue::Undefined);
        assert_eq!(handles.len(), 1);
        drop(h);
        let mut marks = 0;
        handles.for_each_live_mut(|_| marks += 1);
        assert_eq!(handles.len(), 0);
        assert_eq!(marks, 0);
    }

    #[test]
    fn weak_handle_clears_when_unmarked() {
        let mut weak = WeakHandles::new();
        let dummy = unsafe {
            HeapPtr::<()>::new(std::ptr::NonNull::new_unchecked(0x1000 as *mut u8))
        };
        let h = weak.create(TaggedValue::Managed(dummy), None);
        weak.mark_pass(|_| {});
        weak.sweep_pass(|_| false);
        assert!(matches!(h.get(), TaggedValue::Undefined));
    }

    #[test]
    fn host_keep_alive_walks_to_outermost_parent() {
        struct Parent;
        impl HostObject for Parent {
            fn keep_alive_during_gc(&self) -> bool {
                true
            }
            fn parent(&self) -> Option<Rc<dyn HostObject>> {
                None
            }
        }
        struct Child(Rc<dyn HostObject>);
        impl HostObject for Child {
            fn keep_alive_during_gc(&self) -> bool {
                false
            }
            fn parent(&self) -> Option<Rc<dyn HostObject>> {
                Some(self.0.clone())
            }
        }
        let parent: Rc<dyn HostObject> = Rc::new(Parent);
        let child: Rc<dyn HostObject> = Rc::new(Child(parent));
        assert!(host_keep_alive(&child));

        let lonely: Rc<dyn HostObject> = Rc::new(NoHost);
        assert!(!host_keep_alive(&lonely));
    }

    #[test]
    fn host_wrapper_map_reuses_wrapper_for_same_host() {
        let host: Rc<dyn HostObject> = Rc::new(NoHost);
        let wrapper = unsafe { HeapPtr::<()>::new(std::ptr::NonNull::new_unchecked(0x2000 as *mut u8)) };
        let mut map = HostWrapperMap::new();
        assert!(map.get(&host).is_none());
        map.insert(&host, wrapper);
        assert!(matches!(map.get(&host), Some(p) if p == wrapper));
    }

    #[test]
    fn host_wrapper_map_sweep_drops_unmarked_entries() {
        let host: Rc<dyn HostObject> = Rc::new(NoHost);
        let wrapper = unsafe { HeapPtr::<()>::new(std::ptr::NonNull::new_unchecked(0x2000 as *mut u8)) };
        let mut map = HostWrapperMap::new();
        map.insert(&host, wrapper);

        map.sweep(|_| false);

        assert!(map.is_empty());
        assert!(map.get(&host).is_none());
    }
}
