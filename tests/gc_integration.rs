//! End-to-end tests driving `MemoryManager` the way an embedder would:
//! allocate real objects through `allocate`, wire them together via
//! `mark`, and observe what `collect()` reclaims. Complements the
//! per-module unit tests, which exercise C1-C8 in isolation.

use ecma_heap::address::HeapPtr;
use ecma_heap::heap::collector::{GcDeletable, MemoryManager, Tracer, VmBinding};
use ecma_heap::heap::header::{Base, ManagedVtable};
use ecma_heap::heap::roots::{HostObject, TaggedValue};
use ecma_heap::util;
use std::cell::Cell;
use std::rc::Rc;

/// A minimal managed object: a `Base` header, a pointer to an
/// externally-owned counter bumped on destroy, and an optional edge to
/// another managed object for graph tests.
#[repr(C)]
struct TestObj {
    base: Base,
    freed: *const Cell<u32>,
    child: Option<HeapPtr<()>>,
}

static TEST_VTABLE: ManagedVtable = ManagedVtable {
    name: "TestObj",
    mark: test_obj_mark,
    destroy: Some(test_obj_destroy),
};

unsafe fn test_obj_mark(ptr: HeapPtr<()>, tracer: &mut Tracer) {
    let obj = &*(ptr.as_raw() as *const TestObj);
    if let Some(child) = obj.child {
        tracer.push(child);
    }
}

unsafe fn test_obj_destroy(ptr: HeapPtr<()>) {
    let obj = &*(ptr.as_raw() as *const TestObj);
    (*obj.freed).set((*obj.freed).get() + 1);
}

fn alloc_test_obj(mm: &mut MemoryManager<NoRoots>, child: Option<HeapPtr<()>>, freed: *const Cell<u32>) -> HeapPtr<()> {
    let size = util::round_up_to(std::mem::size_of::<TestObj>(), util::SIZE_CLASS_GRANULARITY);
    let ptr = mm.allocate(size);
    unsafe {
        std::ptr::write(
            ptr.as_raw() as *mut TestObj,
            TestObj {
                base: Base::new(&TEST_VTABLE),
                freed,
                child,
            },
        );
    }
    ptr
}

/// A binding with no intrinsic roots of its own; every test wires roots
/// in via `js_stack`/persistent/weak handles explicitly instead.
struct NoRoots;

impl VmBinding for NoRoots {
    fn mark_intrinsic_roots(&self, _tracer: &mut Tracer) {}

    fn out_of_memory(&self, requested_bytes: usize) -> ! {
        panic!("out of memory: OS refused {requested_bytes} bytes");
    }
}

fn new_mm() -> MemoryManager<NoRoots> {
    MemoryManager::new(NoRoots)
}

#[test]
fn unreachable_object_is_reclaimed_on_collect() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let _ptr = alloc_test_obj(&mut mm, None, &freed);

    // Nothing roots it: no js_stack push, no persistent handle.
    mm.collect();

    assert_eq!(freed.get(), 1);
}

#[test]
fn object_reachable_via_js_stack_survives_one_collection() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let ptr = alloc_test_obj(&mut mm, None, &freed);
    mm.js_stack().push(TaggedValue::Managed(ptr));

    mm.collect();

    assert_eq!(freed.get(), 0, "rooted object must not be destroyed");
}

#[test]
fn object_reachable_only_through_child_edge_survives() {
    let mut mm = new_mm();
    let parent_freed = Cell::new(0u32);
    let child_freed = Cell::new(0u32);
    let child = alloc_test_obj(&mut mm, None, &child_freed);
    let parent = alloc_test_obj(&mut mm, Some(child), &parent_freed);
    mm.js_stack().push(TaggedValue::Managed(parent));

    mm.collect();

    assert_eq!(parent_freed.get(), 0);
    assert_eq!(child_freed.get(), 0, "child kept alive transitively through parent's mark");
}

#[test]
fn popping_js_stack_root_lets_collector_reclaim_next_cycle() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let ptr = alloc_test_obj(&mut mm, None, &freed);
    mm.js_stack().push(TaggedValue::Managed(ptr));
    mm.collect();
    assert_eq!(freed.get(), 0);

    mm.js_stack().pop();
    mm.collect();
    assert_eq!(freed.get(), 1);
}

#[test]
fn persistent_handle_keeps_object_alive_after_js_stack_root_is_gone() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let ptr = alloc_test_obj(&mut mm, None, &freed);
    let handle = mm.create_persistent(TaggedValue::Managed(ptr));

    mm.collect();
    assert_eq!(freed.get(), 0);
    assert!(matches!(handle.get(), TaggedValue::Managed(_)));

    drop(handle);
    mm.collect();
    assert_eq!(freed.get(), 1);
}

#[test]
fn weak_handle_clears_to_undefined_once_unreachable() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let ptr = alloc_test_obj(&mut mm, None, &freed);
    let weak = mm.create_weak(TaggedValue::Managed(ptr), None);

    mm.collect();

    assert!(matches!(weak.get(), TaggedValue::Undefined));
    assert_eq!(freed.get(), 1);
}

#[test]
fn block_gc_guard_suppresses_collection_until_dropped() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let _ptr = alloc_test_obj(&mut mm, None, &freed);

    {
        let _guard = mm.block_gc();
        mm.collect();
        assert_eq!(freed.get(), 0, "collect() must no-op while blocked");
    }

    mm.collect();
    assert_eq!(freed.get(), 1, "collect() resumes once the guard is dropped");
}

#[test]
fn many_small_allocations_release_chunks_once_freed() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    for _ in 0..256 {
        alloc_test_obj(&mut mm, None, &freed);
    }
    let allocated_before = mm.allocated_bytes();
    assert!(allocated_before > 0);

    mm.collect();

    assert_eq!(freed.get() as usize, 256);
    assert_eq!(mm.used_bytes(), 0);
    assert!(
        mm.allocated_bytes() <= allocated_before,
        "freeing every object in a size class should let empty chunks be released"
    );
}

struct DeleteRecorder {
    calls: std::rc::Rc<Cell<u32>>,
}

impl GcDeletable for DeleteRecorder {
    fn on_sweep(&mut self, _last_call: bool) {
        self.calls.set(self.calls.get() + 1);
    }
}

#[test]
fn registered_deletable_fires_once_then_is_dropped() {
    let mut mm = new_mm();
    let calls = std::rc::Rc::new(Cell::new(0u32));
    mm.register_deletable(Box::new(DeleteRecorder { calls: calls.clone() }));

    mm.collect();
    assert_eq!(calls.get(), 1, "a deletable is notified on its first sweep");

    mm.collect();
    assert_eq!(
        calls.get(),
        1,
        "the deletable list is drained every sweep, so a stale entry isn't called twice"
    );
}

#[test]
fn large_allocation_above_threshold_round_trips_through_gc() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let size = util::round_up_to(
        util::LARGE_ITEM_THRESHOLD + std::mem::size_of::<TestObj>(),
        util::SIZE_CLASS_GRANULARITY,
    );
    let ptr = mm.allocate(size);
    unsafe {
        std::ptr::write(
            ptr.as_raw() as *mut TestObj,
            TestObj {
                base: Base::new(&TEST_VTABLE),
                freed: &freed,
                child: None,
            },
        );
    }
    mm.js_stack().push(TaggedValue::Managed(ptr));

    mm.collect();
    assert_eq!(freed.get(), 0, "rooted large item must survive");

    mm.js_stack().pop();
    mm.collect();
    assert_eq!(freed.get(), 1, "unrooted large item must be destroyed");
}

struct FakeHost;
impl HostObject for FakeHost {
    fn keep_alive_during_gc(&self) -> bool {
        false
    }
    fn parent(&self) -> Option<Rc<dyn HostObject>> {
        None
    }
}

#[test]
fn host_wrapper_map_forgets_wrapper_once_unreachable() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let wrapper = alloc_test_obj(&mut mm, None, &freed);
    let host: Rc<dyn HostObject> = Rc::new(FakeHost);
    mm.set_host_wrapper(&host, wrapper);
    assert_eq!(mm.host_wrapper(&host), Some(wrapper));

    mm.collect();

    assert_eq!(freed.get(), 1, "wrapper unreachable from any root must be collected");
    assert_eq!(
        mm.host_wrapper(&host),
        None,
        "a wrapper whose markBit didn't survive must be dropped from the map too"
    );
}

#[test]
fn host_wrapper_map_keeps_entry_for_rooted_wrapper() {
    let mut mm = new_mm();
    let freed = Cell::new(0u32);
    let wrapper = alloc_test_obj(&mut mm, None, &freed);
    mm.js_stack().push(TaggedValue::Managed(wrapper));
    let host: Rc<dyn HostObject> = Rc::new(FakeHost);
    mm.set_host_wrapper(&host, wrapper);

    mm.collect();

    assert_eq!(freed.get(), 0);
    assert_eq!(mm.host_wrapper(&host), Some(wrapper));
}
