//! C4: the mark/sweep collector and `MemoryManager`, the engine-owned
//! object that ties C1–C5 together.
//!
//! `MemoryManager` plays the role of the teacher's top-level per-engine
//! state struct: it owns the size-classed allocator, the root sets, the
//! configuration read from the environment, and the GC-blocked gate, and
//! exposes `allocate`/`collect` as the only two entry points the rest of
//! the engine needs.

use crate::address::HeapPtr;
use crate::heap::chunk::Chunk;
use crate::heap::header::Base;
use crate::heap::roots::{HostObject, HostWrapperMap, JsStack, PersistentHandle, PersistentHandles, TaggedValue};
use crate::heap::roots::{WeakHandle, WeakHandles};
use crate::heap::size_class::{self, SizeClassAllocator};
use crate::options::Options;
use crate::util::{self, NUM_SIZE_CLASSES};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Handed to every `markObjects` implementation. Pushing a child is
/// idempotent: an already-marked object is silently ignored, so cyclic
/// object graphs terminate (spec §4.2 "Draining").
pub struct Tracer<'a> {
    stack: &'a mut Vec<HeapPtr<()>>,
}

impl<'a> Tracer<'a> {
    #[inline]
    pub fn push(&mut self, ptr: HeapPtr<()>) {
        let base = unsafe { &mut *(ptr.as_raw() as *mut Base) };
        if !base.mark_bit {
            base.mark_bit = true;
            self.stack.push(ptr);
        }
    }

    #[inline]
    pub fn push_if_managed(&mut self, value: TaggedValue) {
        if let Some(p) = value.as_managed() {
            self.push(p);
        }
    }
}

/// A side registration for objects that need a single notification at
/// the end of every sweep regardless of liveness (spec §4.3 step 6).
pub trait GcDeletable {
    fn on_sweep(&mut self, last_call: bool);
}

/// Anything that supplies the engine-specific parts of a GC cycle: the
/// intrinsic roots only the embedder knows about, and a stack trace for
/// error construction (spec §6 "Engine contract").
pub trait VmBinding {
    fn mark_intrinsic_roots(&self, tracer: &mut Tracer);

    /// The OS refused to hand back `requested_bytes` more memory. Spec
    /// §3.2/§7: this is fatal to the engine, with no recovery path, so
    /// the call never returns; an embedder typically logs and aborts the
    /// process.
    fn out_of_memory(&self, requested_bytes: usize) -> !;
}

/// Per-cycle statistics, logged when the `stats` feature/option is on
/// (spec §4.4, §6 `QV4_MM_STATS`).
#[derive(Debug)]
pub struct GcStats {
    pub used_before: usize,
    pub used_after: usize,
    pub allocated_before: usize,
    pub allocated_after: usize,
    pub chunks_before: usize,
    pub chunks_after: usize,
    pub mark_micros: u128,
    pub sweep_micros: u128,
}

/// RAII guard: while alive, `collect()` calls are no-ops. Mirrors the
/// teacher's explicit `gcBlocked` set/unset pairs, but ties the unset to
/// scope exit so a panicking critical section can't leave GC disabled
/// forever.
pub struct GcBlockGuard<'a> {
    blocked: &'a Cell<bool>,
    previous: bool,
}

impl<'a> Drop for GcBlockGuard<'a> {
    fn drop(&mut self) {
        self.blocked.set(self.previous);
    }
}

pub struct MemoryManager<B: VmBinding> {
    alloc: SizeClassAllocator,
    js_stack: JsStack,
    persistent: PersistentHandles,
    weak: WeakHandles,
    host_wrappers: HostWrapperMap,
    deletables: Vec<Box<dyn GcDeletable>>,
    gc_blocked: Cell<bool>,
    options: Options,
    binding: B,
    last_stats: Option<GcStats>,
}

impl<B: VmBinding> MemoryManager<B> {
    pub fn new(binding: B) -> MemoryManager<B> {
        MemoryManager {
            alloc: SizeClassAllocator::new(),
            js_stack: JsStack::new(),
            persistent: PersistentHandles::new(),
            weak: WeakHandles::new(),
            host_wrappers: HostWrapperMap::new(),
            deletables: Vec::new(),
            gc_blocked: Cell::new(false),
            options: Options::from_env(),
            binding,
            last_stats: None,
        }
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub fn js_stack(&mut self) -> &mut JsStack {
        &mut self.js_stack
    }

    pub fn create_persistent(&mut self, value: TaggedValue) -> PersistentHandle {
        self.persistent.create(value)
    }

    pub fn create_weak(
        &mut self,
        value: TaggedValue,
        host: Option<Rc<dyn HostObject>>,
    ) -> WeakHandle {
        self.weak.create(value, host)
    }

    /// The wrapper already recorded for `host`, if any, so the embedder
    /// can reuse it instead of minting a second JS identity for the same
    /// host object.
    pub fn host_wrapper(&self, host: &Rc<dyn HostObject>) -> Option<HeapPtr<()>> {
        self.host_wrappers.get(host)
    }

    /// Record `wrapper` as the canonical JS wrapper for `host` (spec
    /// §4.3 step 2's multiply-wrapped-host-object map).
    pub fn set_host_wrapper(&mut self, host: &Rc<dyn HostObject>, wrapper: HeapPtr<()>) {
        self.host_wrappers.insert(host, wrapper);
    }

    pub fn register_deletable(&mut self, d: Box<dyn GcDeletable>) {
        self.deletables.push(d);
    }

    pub fn block_gc(&self) -> GcBlockGuard<'_> {
        let previous = self.gc_blocked.replace(true);
        GcBlockGuard {
            blocked: &self.gc_blocked,
            previous,
        }
    }

    pub fn last_stats(&self) -> Option<&GcStats> {
        self.last_stats.as_ref()
    }

    /// C3.allocate, spec §4.1. Never returns an error: an OS allocation
    /// failure is fatal and is handed to `B::out_of_memory`, which does
    /// not return (spec §3.2/§7, "fatal; the engine aborts; no recovery").
    pub fn allocate(&mut self, size: usize) -> HeapPtr<()> {
        debug_assert!(size >= util::SIZE_CLASS_GRANULARITY);
        debug_assert_eq!(size % util::SIZE_CLASS_GRANULARITY, 0);

        if size >= util::LARGE_ITEM_THRESHOLD {
            return self.allocate_large(size);
        }

        let pos = util::size_class_of(size);
        if self.options.aggressive_gc {
            self.collect();
        }
        if let Some(ptr) = self.alloc.try_pop(pos) {
            return zeroed(ptr, size);
        }
        if !self.options.aggressive_gc && self.alloc.should_collect_before_grow(pos) {
            self.collect();
            if let Some(ptr) = self.alloc.try_pop(pos) {
                return zeroed(ptr, size);
            }
        }
        match self
            .alloc
            .grow(pos, self.options.max_shift, self.options.max_chunk_size)
        {
            Ok(ptr) => zeroed(ptr, size),
            Err(e) => self.binding.out_of_memory(e.requested_bytes),
        }
    }

    fn allocate_large(&mut self, size: usize) -> HeapPtr<()> {
        if self.alloc.large_bytes_trigger_exceeded() {
            self.collect();
        }
        let payload_size = util::round_up_to(
            size + std::mem::size_of::<Base>(),
            util::OBJECT_ALIGNMENT,
        );
        let total = size_class::LargeItemHeader::SIZE + payload_size;
        let range = match crate::heap::os::alloc_pages(total) {
            Ok(range) => range,
            Err(e) => self.binding.out_of_memory(e.requested_bytes),
        };
        let header_ptr = unsafe {
            HeapPtr::<()>::new(std::ptr::NonNull::new_unchecked(range.start.to_ptr_mut()))
        };
        let payload = unsafe {
            HeapPtr::<()>::new(std::ptr::NonNull::new_unchecked(
                range.start.add(size_class::LargeItemHeader::SIZE).to_ptr_mut(),
            ))
        };
        self.alloc.push_large_item(header_ptr, payload, payload_size);
        payload
    }

    /// C4.runGC, spec §4.4. A no-op while `gcBlocked`.
    pub fn collect(&mut self) {
        if self.gc_blocked.get() {
            return;
        }
        let stats_enabled = self.options.stats;
        let used_before = self.used_bytes();
        let allocated_before = self.allocated_bytes();
        let chunks_before = self.alloc.chunks().len();

        let mark_start = Instant::now();
        self.mark();
        let mark_micros = mark_start.elapsed().as_micros();

        let sweep_start = Instant::now();
        self.sweep(false);
        let sweep_micros = sweep_start.elapsed().as_micros();

        self.alloc.reset_alloc_counters();

        let stats = GcStats {
            used_before,
            used_after: self.used_bytes(),
            allocated_before,
            allocated_after: self.allocated_bytes(),
            chunks_before,
            chunks_after: self.alloc.chunks().len(),
            mark_micros,
            sweep_micros,
        };
        if stats_enabled {
            log::info!(
                "gc: used {}->{} bytes, allocated {}->{} bytes, chunks {}->{}, mark {}us, sweep {}us",
                stats.used_before,
                stats.used_after,
                stats.allocated_before,
                stats.allocated_after,
                stats.chunks_before,
                stats.chunks_after,
                stats.mark_micros,
                stats.sweep_micros,
            );
        }
        self.last_stats = Some(stats);
    }

    /// spec §4.2. The original drains its mark stack whenever the
    /// interpreter stack it's reusing nears its limit, since that stack
    /// has a fixed size. This substrate gives the mark stack its own
    /// growable `Vec` (see the module doc on [`crate::heap::roots`]), so
    /// there is no bounded limit to poll against; a single drain after
    /// all root kinds have pushed is behaviorally equivalent — the mark
    /// phase is monotone reachability, so intermediate drain timing
    /// cannot change the result (spec §4.2 "Ordering").
    fn mark(&mut self) {
        let mut stack = Vec::new();

        {
            let mut tracer = Tracer { stack: &mut stack };
            self.binding.mark_intrinsic_roots(&mut tracer);
        }

        self.persistent.for_each_live_mut(|p| {
            let mut tracer = Tracer { stack: &mut stack };
            tracer.push(p);
        });

        for value in self.js_stack.iter() {
            if let Some(p) = value.as_managed() {
                let mut tracer = Tracer { stack: &mut stack };
                tracer.push(p);
            }
        }

        // Weak handles are visited after the JS stack so their unlink
        // decision observes every other root kind's marks first (spec
        // §4.2 "Ordering").
        self.weak.mark_pass(|p| {
            let mut tracer = Tracer { stack: &mut stack };
            tracer.push(p);
        });

        self.drain_with_vtable(&mut stack);
    }

    fn drain_with_vtable(&self, stack: &mut Vec<HeapPtr<()>>) {
        while let Some(ptr) = stack.pop() {
            let base = unsafe { &*(ptr.as_raw() as *const Base) };
            debug_assert!(base.in_use, "marked a free slot");
            let vtable = unsafe { base.vtable() };
            let mut tracer = Tracer { stack };
            unsafe { (vtable.mark)(ptr, &mut tracer) };
        }
    }

    /// spec §4.3.
    fn sweep(&mut self, last_sweep: bool) {
        self.weak.sweep_pass(|p| {
            let base = unsafe { &*(p.as_raw() as *const Base) };
            base.mark_bit
        });

        self.host_wrappers.sweep(|p| {
            let base = unsafe { &*(p.as_raw() as *const Base) };
            base.mark_bit
        });

        for pos in 1..=NUM_SIZE_CLASSES {
            self.sweep_class(pos);
        }
        self.sweep_large_items();

        // The whole list is drained and dropped every sweep, not only the
        // final one of a shutdown sequence; `last_sweep` is purely the
        // flag forwarded to the callback (spec §4.3 step 6).
        let mut deletables = std::mem::take(&mut self.deletables);
        for d in &mut deletables {
            d.on_sweep(last_sweep);
        }
    }

    fn sweep_class(&mut self, pos: usize) {
        let slot_size = pos * util::SIZE_CLASS_GRANULARITY;
        let mut free_head: Option<HeapPtr<()>> = None;
        let mut available = 0usize;
        let mut freed_chunks = Vec::new();

        let chunk_starts: Vec<_> = self
            .alloc
            .chunks()
            .iter()
            .filter(|c| c.slot_size == slot_size)
            .map(|c| c.range.start)
            .collect();

        for start in chunk_starts {
            let chunk_ptr: *const Chunk = self.alloc.chunks().find(start).unwrap();
            let chunk = unsafe { &*chunk_ptr };
            let num_slots = chunk.num_slots;
            let mut chunk_live = 0usize;
            let mut chunk_free_here = 0usize;

            for i in 0..num_slots {
                let addr = chunk.slot_addr(i);
                let ptr = unsafe {
                    HeapPtr::<()>::new(std::ptr::NonNull::new_unchecked(addr.to_ptr_mut()))
                };
                let base = unsafe { &mut *(ptr.as_raw() as *mut Base) };
                if base.mark_bit {
                    base.mark_bit = false;
                    chunk_live += 1;
                } else if base.in_use {
                    let vtable = unsafe { base.vtable() };
                    if let Some(destroy) = vtable.destroy {
                        unsafe { destroy(ptr) };
                    }
                    unsafe { std::ptr::write_bytes(ptr.as_raw(), 0, slot_size) };
                    unsafe { size_class::write_free_link(ptr, free_head) };
                    free_head = Some(ptr);
                    available += 1;
                    chunk_free_here += 1;
                } else {
                    unsafe { size_class::write_free_link(ptr, free_head) };
                    free_head = Some(ptr);
                    available += 1;
                    chunk_free_here += 1;
                }
            }

            if chunk_free_here == num_slots {
                freed_chunks.push((start, chunk_live, num_slots));
            }
        }

        // Release fully-empty chunks, provided doing so still leaves
        // enough availableItems to cover items still in use (spec §4.3
        // step 4).
        for (start, _chunk_live, num_slots) in freed_chunks {
            let in_use = self.alloc.class_in_use(pos);
            if available.saturating_sub(num_slots) >= in_use {
                if let Some(chunk) = self.alloc.chunks_mut().remove(start) {
                    available -= num_slots;
                    self.alloc.shrink_total_items(pos, num_slots);
                    unsafe { crate::heap::os::dealloc_pages(chunk.range) };
                }
            }
        }

        self.alloc.replace_freelist(pos, free_head, available);
    }

    fn sweep_large_items(&mut self) {
        let mut head = self.alloc.take_large_items();
        let mut kept: Option<HeapPtr<()>> = None;
        let mut tail: Option<HeapPtr<()>> = None;
        while let Some(ptr) = head {
            let base = unsafe { &mut *(ptr.as_raw() as *mut Base) };
            let next = unsafe { (*size_class::large_item_header(ptr)).next };
            if base.mark_bit {
                base.mark_bit = false;
                match tail {
                    None => {
                        kept = Some(ptr);
                        tail = Some(ptr);
                    }
                    Some(t) => {
                        unsafe { (*size_class::large_item_header(t)).next = Some(ptr) };
                        tail = Some(ptr);
                    }
                }
            } else {
                unsafe {
                    let vtable = base.vtable();
                    if let Some(destroy) = vtable.destroy {
                        destroy(ptr);
                    }
                }
            }
            head = next;
        }
        if let Some(t) = tail {
            unsafe { (*size_class::large_item_header(t)).next = None };
        }
        self.alloc.set_large_items(kept);
    }

    pub fn used_bytes(&self) -> usize {
        self.alloc.used_bytes()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.alloc.allocated_bytes()
    }
}

/// Post-condition of C3.allocate (spec §4.1): "the returned object is
/// entirely zeroed". A slot popped off a freelist still carries the
/// freelist-link word written into its first bytes by the previous
/// sweep or grow; a freshly carved slot is already zero (it came
/// straight from `mmap`), but zeroing unconditionally is cheap and
/// removes the freelist-vs-fresh distinction from every call site.
fn zeroed(ptr: HeapPtr<()>, size: usize) -> HeapPtr<()> {
    unsafe { std::ptr::write_bytes(ptr.as_raw(), 0, size) };
    ptr
}
