//! Break sources: the operating-system end of the allocator.

use libc::{c_void, intptr_t};

/// A contiguous, extensible memory region with a movable upper boundary.
///
/// This is the seam between the allocator engine and the OS. The real
/// implementation is [`Sbrk`]; tests substitute an owned buffer.
///
/// # Safety
///
/// Implementations must uphold the break contract: a `Some(base)` return from
/// [`grow`](BreakSource::grow) hands the caller exclusive ownership of
/// `bytes` bytes at `base`, valid for reads and writes until released by a
/// matching [`shrink`](BreakSource::shrink), and
/// [`current`](BreakSource::current) reports the exact end of the owned
/// region.
pub unsafe trait BreakSource {
    /// Returns the current break, one past the last owned byte.
    fn current(&self) -> *mut u8;

    /// Extends the region by `bytes` and returns the previous break, which is
    /// the start of the newly owned memory. Returns `None` when the OS denies
    /// the growth; the region is unchanged in that case.
    fn grow(&mut self, bytes: usize) -> Option<*mut u8>;

    /// Releases `bytes` from the top of the region. Shrinking has no failure
    /// path; callers never release more than they grew.
    fn shrink(&mut self, bytes: usize);
}

/// The process break, moved through `sbrk`.
///
/// The process has exactly one break, so whatever owns an `Sbrk` must be the
/// only thing in the process that moves it. In particular, do not combine it
/// with another allocator that also calls `sbrk` or `brk`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

// SAFETY: sbrk(n) with n > 0 maps n new writable bytes at the returned
// previous break, and sbrk(0) reports the break without moving it.
unsafe impl BreakSource for Sbrk {
    fn current(&self) -> *mut u8 {
        // SAFETY: a zero increment only queries the break.
        unsafe { libc::sbrk(0) }.cast()
    }

    fn grow(&mut self, bytes: usize) -> Option<*mut u8> {
        let delta = intptr_t::try_from(bytes).ok()?;
        // SAFETY: the delta is non-negative and within the sbrk domain.
        let previous = unsafe { libc::sbrk(delta) };
        if previous == usize::MAX as *mut c_void {
            return None;
        }
        Some(previous.cast())
    }

    fn shrink(&mut self, bytes: usize) {
        let Ok(delta) = intptr_t::try_from(bytes) else {
            return;
        };
        // SAFETY: callers release at most what a prior grow returned, so the
        // break never drops below its original position.
        unsafe { libc::sbrk(-delta) };
    }
}
