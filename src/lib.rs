//! Brkalloc - a first-fit memory allocator over the process break.
//!
//! Every allocation lives on the program break and is preceded by an in-band
//! header. Headers form an address-ordered singly linked list that is scanned
//! first-fit on allocation; freeing the block at the top of the heap returns
//! its memory to the OS by shrinking the break, freeing any other block marks
//! it for reuse. One lock serializes everything.
//!
//! [`GlobalBrk`] is the embedding point:
//!
//! ```rust,ignore
//! use brkalloc::GlobalBrk;
//!
//! #[global_allocator]
//! static ALLOC: GlobalBrk = GlobalBrk::new();
//! ```
#![cfg_attr(not(test), no_std)]
#![warn(missing_debug_implementations)]
#![forbid(unsafe_op_in_unsafe_fn)]

use core::sync::atomic::AtomicBool;

#[macro_use]
#[allow(unused_macros)]
pub(crate) mod alog;

pub mod brk;
pub mod global;
pub mod list_alloc;

pub use global::GlobalBrk;

pub(crate) static ALLOC_LOG: AtomicBool = AtomicBool::new(false);

/// Enables logging for the allocator.
///
/// Off by default, and it must stay off while the allocator serves as
/// `#[global_allocator]`: the `log` machinery allocates, and the allocator
/// must not re-enter itself.
pub fn enable_logging() {
    ALLOC_LOG.store(true, core::sync::atomic::Ordering::Relaxed);
}

/// Disables logging for the allocator.
pub fn disable_logging() {
    ALLOC_LOG.store(false, core::sync::atomic::Ordering::Relaxed);
}

pub(crate) fn should_log() -> bool {
    ALLOC_LOG.load(core::sync::atomic::Ordering::Relaxed)
}
