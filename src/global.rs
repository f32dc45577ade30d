//! The process-wide allocator context.

use core::{
    alloc::{GlobalAlloc, Layout},
    fmt::Debug,
};

use spin::{Mutex, MutexGuard, Once};

use crate::brk::{BreakSource, Sbrk};
use crate::list_alloc::allocator::ListAllocator;
use crate::list_alloc::header::MAX_ALIGN;

/// A lock-guarded [`ListAllocator`] context, fit for a static.
///
/// The engine is created lazily on first use and lives for the rest of the
/// process; there is no teardown. Every allocate and deallocate holds the one
/// lock for its whole duration, break movement included, so exactly one call
/// mutates the heap at a time and everyone else waits.
///
/// Implements [`GlobalAlloc`] over the engine, which is how the two
/// operations replace the standard allocation interface:
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOC: GlobalBrk = GlobalBrk::new();
/// ```
///
/// Requests aligned beyond [`MAX_ALIGN`] are refused with null; worst-case
/// padding is all the alignment the engine guarantees.
pub struct GlobalBrk<B: BreakSource = Sbrk> {
    inner: Once<Mutex<ListAllocator<B>>>,
}

impl<B: BreakSource> GlobalBrk<B> {
    /// Creates an empty context. No engine exists until the first use, or
    /// until [`init`](Self::init) seeds one.
    pub const fn new() -> Self {
        Self { inner: Once::new() }
    }

    /// Seeds the engine with a specific break source ahead of first use.
    /// Does nothing if the engine already exists.
    pub fn init<F>(&self, source: F)
    where
        F: FnOnce() -> B,
    {
        self.inner.call_once(|| Mutex::new(ListAllocator::new(source())));
    }

    /// Does the engine exist yet?
    pub fn is_initialized(&self) -> bool {
        self.inner.is_completed()
    }
}

impl<B: BreakSource + Default> GlobalBrk<B> {
    fn engine(&self) -> &Mutex<ListAllocator<B>> {
        self.inner
            .call_once(|| Mutex::new(ListAllocator::new(B::default())))
    }

    /// Locks the engine, creating it first if this is the first use. Blocks
    /// until the current holder is done; there is no timeout.
    pub fn lock(&self) -> MutexGuard<'_, ListAllocator<B>> {
        self.engine().lock()
    }
}

impl<B: BreakSource> Default for GlobalBrk<B> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: alloc and dealloc forward to the engine under the lock. The caller
// of GlobalAlloc upholds the pointer contract; exclusive ownership of the
// break region comes with installing this as the process allocator.
unsafe impl<B: BreakSource + Default> GlobalAlloc for GlobalBrk<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_ALIGN {
            aerror!("cannot align to {}, handing out null", layout.align());
            return core::ptr::null_mut();
        }
        // SAFETY: see the impl comment.
        unsafe { self.lock().allocate(layout.size()) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // The in-band header already records everything the layout would say.
        // SAFETY: see the impl comment.
        unsafe { self.lock().deallocate(ptr) }
    }
}

impl<B: BreakSource> Debug for GlobalBrk<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.inner.get().and_then(|engine| engine.try_lock()) {
            Some(engine) => engine.fmt(f),
            None => write!(f, "GlobalBrk {{ <uninitialized or locked> }}"),
        }
    }
}
