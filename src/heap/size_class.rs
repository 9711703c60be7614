//! C3: the size-classed freelist allocator.
//!
//! Serves allocation requests below [`crate::util::LARGE_ITEM_THRESHOLD`]
//! bytes from per-size-class freelists backed by page-granular chunks.
//! Freelist links are overlaid on the first word of each free slot (spec
//! §9 "freelist link via first word"), which is why every freed slot must
//! be zeroed before being linked back in: a stale `markBit`/`inUse` byte
//! sitting where the next pointer now lives would corrupt the next pop.
//!
//! This module owns the per-class accounting and chunk growth; it does
//! not decide *when* to collect — that heuristic, and the actual
//! triggering of a GC cycle, belongs to
//! [`crate::heap::collector::MemoryManager::allocate`], which is the
//! thing that actually knows how to run C4.

use crate::address::HeapPtr;
use crate::heap::chunk::{Chunk, ChunkTable};
use crate::heap::os::{self, OsAllocError};
use crate::util::{self, NUM_SIZE_CLASSES};

/// Per-size-class bookkeeping, indexed by `pos - 1` where `pos =
/// ceil(size/16)` (spec §3).
#[derive(Default)]
struct ClassState {
    free_head: Option<HeapPtr<()>>,
    n_chunks: u32,
    available_items: usize,
    total_items: usize,
    alloc_count: usize,
}

/// A large (≥512 byte) allocation, carried on its own singly-linked list
/// rather than a size-classed freelist (spec §3 `LargeItem`: "{next,
/// size, payload}; payload is itself a Heap.Base"). This header sits
/// immediately before the payload's own [`crate::heap::header::Base`];
/// the pointer the allocator hands out always points *after* this
/// header, at the `Base`, so small and large allocations look the same
/// to every caller. `mark_bit` lives in the trailing `Base`, not here.
#[repr(C)]
pub(crate) struct LargeItemHeader {
    pub next: Option<HeapPtr<()>>,
    pub size: usize,
}

impl LargeItemHeader {
    pub const SIZE: usize = std::mem::size_of::<LargeItemHeader>();
}

/// # Safety
/// `payload` must be a pointer previously returned as the payload half
/// of a large-item allocation (i.e. `header_ptr + LargeItemHeader::SIZE`
/// from [`SizeClassAllocator::push_large_item`]).
pub(crate) unsafe fn large_item_header(payload: HeapPtr<()>) -> *mut LargeItemHeader {
    payload.as_raw().sub(LargeItemHeader::SIZE) as *mut LargeItemHeader
}

pub struct SizeClassAllocator {
    classes: Vec<ClassState>,
    chunks: ChunkTable,
    large_items: Option<HeapPtr<()>>,
    total_large_items_allocated: usize,
}

impl SizeClassAllocator {
    pub fn new() -> SizeClassAllocator {
        SizeClassAllocator {
            classes: (0..NUM_SIZE_CLASSES).map(|_| ClassState::default()).collect(),
            chunks: ChunkTable::new(),
            large_items: None,
            total_large_items_allocated: 0,
        }
    }

    #[inline]
    fn slot_size_for_pos(pos: usize) -> usize {
        pos * util::SIZE_CLASS_GRANULARITY
    }

    /// Pop a slot off class `pos`'s freelist, if non-empty.
    pub fn try_pop(&mut self, pos: usize) -> Option<HeapPtr<()>> {
        let class = &mut self.classes[pos - 1];
        let head = class.free_head?;
        let next = unsafe { read_free_link(head) };
        class.free_head = next;
        class.available_items -= 1;
        class.alloc_count += 1;
        Some(head)
    }

    /// Heuristic from spec §4.1: collect before growth when this class's
    /// allocations-since-GC already exceed half its available items and
    /// overall allocation pressure exceeds half of everything ever handed
    /// out, unless aggressive GC already forced a collection up front.
    pub fn should_collect_before_grow(&self, pos: usize) -> bool {
        let class = &self.classes[pos - 1];
        let total_alloc: usize = self.classes.iter().map(|c| c.alloc_count).sum();
        let total_items: usize = self.classes.iter().map(|c| c.total_items).sum();
        class.alloc_count > class.available_items / 2 && total_alloc > total_items / 2
    }

    /// Grow class `pos` by one more chunk and return the first free slot.
    pub fn grow(
        &mut self,
        pos: usize,
        max_shift: u8,
        max_chunk_size: usize,
    ) -> Result<HeapPtr<()>, OsAllocError> {
        let slot_size = Self::slot_size_for_pos(pos);
        let class = &mut self.classes[pos - 1];
        class.n_chunks += 1;
        let shift = class.n_chunks.min(max_shift as u32);
        let alloc_size = util::round_up_to(max_chunk_size << shift, os::page_size());
        let range = os::alloc_pages(alloc_size)?;
        let chunk = Chunk::new(range, slot_size);

        let num_slots = chunk.num_slots;
        debug_assert!(num_slots > 0, "chunk smaller than one slot of its class");

        // Thread every slot but the first onto the freelist; hand the
        // first back to the caller directly, matching the teacher's
        // "carve then immediately satisfy the request that caused the
        // growth" shape.
        let mut prev: Option<HeapPtr<()>> = class.free_head;
        for i in (1..num_slots).rev() {
            let ptr = slot_ptr(&chunk, i);
            unsafe { write_free_link(ptr, prev) };
            prev = Some(ptr);
        }
        class.free_head = prev;
        class.available_items += num_slots - 1;
        class.total_items += num_slots;

        let first = slot_ptr(&chunk, 0);
        self.chunks.insert(chunk);
        Ok(first)
    }

    pub fn reset_alloc_counters(&mut self) {
        for class in &mut self.classes {
            class.alloc_count = 0;
        }
        self.total_large_items_allocated = 0;
    }

    pub fn large_bytes_trigger_exceeded(&self) -> bool {
        self.total_large_items_allocated > util::LARGE_ITEM_GC_TRIGGER_BYTES
    }

    /// `header_ptr` is the true start of the allocation (where
    /// `LargeItemHeader` lives); `payload` is the address immediately
    /// past it, where the embedded `Base` begins and which every other
    /// part of the collector treats as "the object". `size` is the
    /// payload size, not counting the header.
    pub fn push_large_item(&mut self, header_ptr: HeapPtr<()>, payload: HeapPtr<()>, size: usize) {
        let header = unsafe { &mut *(header_ptr.as_raw() as *mut LargeItemHeader) };
        header.next = self.large_items;
        header.size = size;
        self.total_large_items_allocated += size;
        self.large_items = Some(payload);
    }

    pub fn chunks(&self) -> &ChunkTable {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut ChunkTable {
        &mut self.chunks
    }

    /// Used memory: slots in use across every size class, plus large
    /// items, in bytes.
    pub fn used_bytes(&self) -> usize {
        let small: usize = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.total_items - c.available_items) * Self::slot_size_for_pos(i + 1))
            .sum();
        small + self.total_large_items_allocated
    }

    pub fn allocated_bytes(&self) -> usize {
        let small: usize = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| c.total_items * Self::slot_size_for_pos(i + 1))
            .sum();
        small + self.total_large_items_allocated
    }

    pub fn class_available(&self, pos: usize) -> usize {
        self.classes[pos - 1].available_items
    }

    pub fn class_total(&self, pos: usize) -> usize {
        self.classes[pos - 1].total_items
    }

    pub fn class_in_use(&self, pos: usize) -> usize {
        let c = &self.classes[pos - 1];
        c.total_items - c.available_items
    }

    /// Rebuild class `pos`'s freelist to exactly `head`, replacing
    /// whatever chain sweep found reachable, and set the new
    /// `available_items` count (spec §4.3 step 4).
    pub fn replace_freelist(&mut self, pos: usize, head: Option<HeapPtr<()>>, available: usize) {
        let class = &mut self.classes[pos - 1];
        class.free_head = head;
        class.available_items = available;
    }

    pub fn shrink_total_items(&mut self, pos: usize, by: usize) {
        self.classes[pos - 1].total_items -= by;
    }

    pub fn take_large_items(&mut self) -> Option<HeapPtr<()>> {
        self.large_items.take()
    }

    pub fn set_large_items(&mut self, head: Option<HeapPtr<()>>) {
        self.large_items = head;
    }
}

#[inline]
fn slot_ptr(chunk: &Chunk, index: usize) -> HeapPtr<()> {
    let addr = chunk.slot_addr(index);
    unsafe { HeapPtr::new(std::ptr::NonNull::new_unchecked(addr.to_ptr_mut())) }
}

/// # Safety
/// `ptr` must reference a slot that is currently free (not `inUse`), so
/// overlaying the link in its first word does not clobber live data.
pub unsafe fn write_free_link(ptr: HeapPtr<()>, next: Option<HeapPtr<()>>) {
    let encoded = next.map(|p| p.addr().as_usize()).unwrap_or(0);
    std::ptr::write(ptr.as_raw() as *mut usize, encoded);
}

/// # Safety
/// `ptr` must reference a slot most recently linked via
/// [`write_free_link`] and not yet reused.
pub unsafe fn read_free_link(ptr: HeapPtr<()>) -> Option<HeapPtr<()>> {
    let encoded = std::ptr::read(ptr.as_raw() as *const usize);
    if encoded == 0 {
        None
    } else {
        Some(HeapPtr::new(std::ptr::NonNull::new_unchecked(
            encoded as *mut u8,
        )))
    }
}
