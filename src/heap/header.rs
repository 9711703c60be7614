//! The managed object header and its vtable contract.
//!
//! Every heap-allocated value begins with a [`Base`] header. The header
//! does not know the concrete Rust type of the object that follows it —
//! that knowledge lives in the [`ManagedVtable`] the header points at, a
//! plain struct of function pointers rather than a Rust trait object, so
//! the collector can find `mark` and `destroy` from nothing but a raw
//! `HeapPtr<()>` during sweep, long after any static type information is
//! available (mirrors the teacher's avoidance of trait-object vtables for
//! GC-visible state; spec.md §9 calls this out explicitly).

use crate::address::HeapPtr;
use crate::heap::collector::Tracer;

/// Function-pointer table every managed type installs in its header.
///
/// `mark` is called once per live object during the mark phase and must
/// forward every outgoing managed reference to the tracer. `destroy` is
/// called once per unreachable object during sweep, after which the slot
/// is returned to its size class's freelist; it must run any `Drop`-like
/// cleanup for non-managed resources (file handles, interned-string
/// refcounts, etc) but must **not** touch other managed objects, which
/// may already have been destroyed.
#[repr(C)]
pub struct ManagedVtable {
    pub name: &'static str,
    pub mark: unsafe fn(HeapPtr<()>, &mut Tracer),
    pub destroy: Option<unsafe fn(HeapPtr<()>)>,
}

/// The common header prefixing every managed allocation. Exactly 16
/// bytes, as spec.md §3 requires ("the header is the first 16 bytes of
/// every object"): one pointer-sized `vtable` field plus two bools,
/// padded to the pointer's alignment.
///
/// `next_free` overlays the first data word of the object whenever the
/// slot is on a freelist (spec.md §3, §9: "the freelist link is stored in
/// the first word of the free slot itself, reusing the payload"). Reading
/// `next_free` while the slot is in use is a logic error — it aliases
/// live object data — so access goes through the unsafe freelist-only
/// accessors on [`crate::heap::size_class::SizeClassAllocator`], not
/// through this struct directly.
///
/// `vtable` is a raw pointer rather than `&'static ManagedVtable` on
/// purpose: every freshly carved, not-yet-constructed slot is all-zero
/// bytes (it came straight from `mmap` or a freelist zeroing-on-free),
/// and an all-zero `Base` must be a legal value so the sweeper can read
/// *any* slot in a chunk uniformly before knowing whether it holds a
/// live object. A `&'static` reference can never be null, so it cannot
/// occupy that all-zero state; a raw pointer can.
///
/// spec.md §3 also lists `internalClass` ("non-owning pointer to a C7
/// node describing layout and vtable") as a header field. This crate
/// does not carry it: every managed type's vtable is known statically at
/// construction (see [`Base::new`]), and no managed object in this
/// crate ever needs to recover its shape from the header alone — the one
/// C7 client ([`crate::errors::ErrorObject`]) keeps its `InternalClass`
/// directly on its own (non-GC, `Rc`-owned) struct instead. See
/// DESIGN.md for the full reasoning.
#[repr(C)]
pub struct Base {
    pub vtable: *const ManagedVtable,
    pub in_use: bool,
    pub mark_bit: bool,
}

impl Base {
    pub fn new(vtable: &'static ManagedVtable) -> Base {
        Base {
            vtable: vtable as *const ManagedVtable,
            in_use: true,
            mark_bit: false,
        }
    }

    /// # Safety
    /// `self.vtable` must be non-null (i.e. `self.in_use` must be true).
    #[inline]
    pub unsafe fn vtable(&self) -> &'static ManagedVtable {
        &*self.vtable
    }
}

static_assertions::assert_eq_size!(bool, u8);
static_assertions::const_assert_eq!(std::mem::size_of::<Base>(), 16);
