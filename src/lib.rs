//! A precise, non-moving mark-and-sweep garbage collector and
//! hidden-class shape system for an ECMAScript engine core.
//!
//! This crate is the runtime substrate, not an engine: the interpreter,
//! parser, and value representation it assumes all live outside it (see
//! [`vm`]). What's here is everything those collaborators need in order
//! to allocate, trace, and canonicalize object layouts safely:
//!
//! - [`heap`]: the size-classed allocator, the mark/sweep collector, and
//!   the root sets it traces.
//! - [`shape`]: identifier interning, the property hash, and the
//!   canonical shape/transition DAG.
//! - [`errors`]: the Error object family, a concrete client of both.
//!
//! Enable the `stats` feature (on by default) to have [`options::Options`]
//! install an `env_logger` subscriber so `QV4_MM_STATS=1` produces
//! visible output; without it, the crate still emits `log` records and
//! expects the host to have already installed a subscriber.

pub mod address;
pub mod errors;
pub mod heap;
pub mod options;
pub mod shape;
pub mod stats;
pub mod util;
pub mod vm;

#[cfg(all(feature = "stats", test))]
fn init_test_logger() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
