//! C1: OS page allocation.
//!
//! Thin wrapper over anonymous `mmap`/`munmap`. Pages are reserved and
//! committed in one step (spec.md's Open Question on reserve-vs-commit is
//! resolved in favor of the simpler always-committed scheme, since this
//! substrate targets a single address space with no over-commit budget to
//! manage — see DESIGN.md).

use crate::address::Address;
use std::sync::OnceLock;

/// A contiguous range of whole OS pages.
#[derive(Copy, Clone, Debug)]
pub struct PageRange {
    pub start: Address,
    pub len: usize,
}

impl PageRange {
    #[inline]
    pub fn end(&self) -> Address {
        self.start.add(self.len)
    }
}

/// Fatal allocation failure: the OS refused to give us more memory.
/// Spec.md §3.2 tier 1 ("Fatal") — propagated with `?` up through
/// [`crate::heap::size_class::SizeClassAllocator::grow`] to
/// [`crate::heap::collector::MemoryManager::allocate`], which hands it to
/// [`crate::heap::collector::VmBinding::out_of_memory`] instead of
/// returning it to its own caller; that call never returns.
#[derive(Debug)]
pub struct OsAllocError {
    pub requested_bytes: usize,
}

impl std::fmt::Display for OsAllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to mmap {} bytes from the OS",
            self.requested_bytes
        )
    }
}

impl std::error::Error for OsAllocError {}

/// Page size of the running system, read once via `sysconf(_SC_PAGESIZE)`.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz <= 0 {
            4096
        } else {
            sz as usize
        }
    })
}

/// Reserve and commit at least `bytes` worth of whole pages.
pub fn alloc_pages(bytes: usize) -> Result<PageRange, OsAllocError> {
    let len = crate::util::round_up_to(bytes.max(1), page_size());
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(OsAllocError {
            requested_bytes: len,
        });
    }
    log::trace!("os: mapped {len} bytes at {:?}", ptr);
    Ok(PageRange {
        start: Address::from_mut_ptr(ptr),
        len,
    })
}

/// Release a range previously returned by [`alloc_pages`].
///
/// # Safety
/// `range` must have come from a prior, not-yet-released call to
/// `alloc_pages`, and nothing may still hold a reference into it.
pub unsafe fn dealloc_pages(range: PageRange) {
    log::trace!("os: unmapping {} bytes at {:?}", range.len, range.start);
    let rc = libc::munmap(range.start.to_ptr_mut(), range.len);
    debug_assert_eq!(rc, 0, "munmap failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_sane_power_of_two() {
        let ps = page_size();
        assert!(ps >= 4096);
        assert!(ps.is_power_of_two());
    }

    #[test]
    fn alloc_then_dealloc_roundtrips() {
        let range = alloc_pages(1).expect("mmap should succeed");
        assert_eq!(range.len, page_size());
        assert!(range.start.is_aligned_to(page_size()));
        unsafe {
            let p = range.start.to_ptr_mut::<u8>();
            std::ptr::write(p, 0xAB);
            assert_eq!(std::ptr::read(p), 0xAB);
            dealloc_pages(range);
        }
    }

    #[test]
    fn alloc_rounds_up_to_whole_pages() {
        let range = alloc_pages(1).unwrap();
        assert_eq!(range.len, page_size());
        unsafe { dealloc_pages(range) };

        let range = alloc_pages(page_size() + 1).unwrap();
        assert_eq!(range.len, 2 * page_size());
        unsafe { dealloc_pages(range) };
    }
}
