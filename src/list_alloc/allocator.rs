use core::{fmt::Debug, ptr};

use super::header::{
    BlockHeader, HEADER_SIZE, MAX_ALIGN, header_of, pad_request, payload_end, payload_of,
};
use crate::brk::BreakSource;

/// A first-fit allocator whose blocks live on a break region.
///
/// Headers are stored in band, immediately below the payloads they describe,
/// and are chained in ascending address order from `head` to `tail`. Blocks
/// are created by growing the break and destroyed only when the block at the
/// very top of the region is freed, which shrinks the break back; a freed
/// block anywhere else stays listed and is handed out again by the first-fit
/// scan.
///
/// The engine takes `&mut self`, so a single instance is data-race free by
/// construction. Share it by wrapping it in a lock; [`GlobalBrk`] does
/// exactly that.
///
/// [`GlobalBrk`]: crate::global::GlobalBrk
pub struct ListAllocator<B: BreakSource> {
    brk: B,
    head: *mut BlockHeader,
    tail: *mut BlockHeader,
    allocation_balance: isize,
}

// Header pointers only ever target memory owned by `brk`, which moves with
// the allocator.
unsafe impl<B: BreakSource + Send> Send for ListAllocator<B> {}
unsafe impl<B: BreakSource + Sync> Sync for ListAllocator<B> {}

impl<B: BreakSource> ListAllocator<B> {
    /// Creates an allocator over the given break source. Nothing is grown
    /// until the first allocation.
    pub fn new(brk: B) -> Self {
        Self {
            brk,
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            allocation_balance: 0,
        }
    }

    /// Allocates `size` writable bytes and returns a pointer to them, aligned
    /// to [`MAX_ALIGN`]. Returns null when `size` is 0 or the break cannot be
    /// grown; neither failure mutates the allocator.
    ///
    /// A free listed block large enough for the request is reused in place.
    /// Its recorded size is overwritten with the (padded) request, so any
    /// excess capacity the block had is not seen again by later scans or by
    /// the shrink arithmetic in [`deallocate`](Self::deallocate).
    ///
    /// # Safety
    ///
    /// The break region of this allocator's source must be exclusively owned
    /// by this allocator: nothing else may move the break or touch memory
    /// above the position it had when the allocator took over.
    #[must_use = "Returned pointer must be released with deallocate"]
    pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            awarn!("refusing a zero-size allocation request");
            return ptr::null_mut();
        }
        let Some(padded) = pad_request(size) else {
            aerror!("request of {} bytes overflows when padded", size);
            return ptr::null_mut();
        };

        if let Some(header) = self.find_free_block(padded) {
            // SAFETY: headers reachable from the list stay valid while the
            // break region above them is owned.
            unsafe {
                ainfo!(
                    "reusing block {:p} (recorded {} bytes) for {} bytes",
                    header,
                    (*header).size,
                    padded
                );
                // The block's true capacity is forgotten here.
                (*header).size = padded;
                (*header).is_free = false;
                self.allocation_balance += 1;
                return payload_of(header);
            }
        }

        self.grow_new_block(padded)
    }

    /// Releases a pointer previously returned by [`allocate`](Self::allocate).
    ///
    /// Null is a no-op. A block whose recorded payload runs exactly up to the
    /// break is unlinked and its memory is returned to the OS; any other
    /// block is marked free and stays listed for reuse. The shrink uses the
    /// recorded size, so a block whose size was reduced by reuse never
    /// reaches the break again and is never returned to the OS.
    ///
    /// # Safety
    ///
    /// `payload` must be null, or a pointer previously returned by
    /// [`allocate`](Self::allocate) on this allocator and not deallocated
    /// since. Anything else is undefined behavior, and it is not detected.
    pub unsafe fn deallocate(&mut self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }
        // SAFETY: the caller promises `payload` came from allocate and is
        // live, so a valid header precedes it.
        let header = unsafe { header_of(payload) };
        // SAFETY: same as above.
        let end = unsafe { payload_end(header) };

        if end == self.brk.current() {
            debug_assert_eq!(header, self.tail, "heap-top block is not the tail");
            self.unlink_tail();
            // SAFETY: the header stays readable until the shrink below.
            let recorded = unsafe { (*header).size };
            ainfo!("releasing heap-top block {:p} ({} bytes)", header, recorded);
            self.allocation_balance -= 1;
            self.brk.shrink(HEADER_SIZE + recorded);
            return;
        }

        adebug!("marking block {:p} free", header);
        // SAFETY: live header per the caller contract.
        unsafe { (*header).is_free = true };
        self.allocation_balance -= 1;
    }

    /// First-fit scan: the lowest-address free block with a recorded size of
    /// at least `size`.
    fn find_free_block(&self, size: usize) -> Option<*mut BlockHeader> {
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: listed headers are valid.
            unsafe {
                if (*current).is_free && (*current).size >= size {
                    return Some(current);
                }
                current = (*current).next;
            }
        }
        None
    }

    fn grow_new_block(&mut self, padded: usize) -> *mut u8 {
        // The break starts wherever the OS left it; pad the first growth so
        // the header lands on a worst-case boundary. Every later grow and
        // shrink moves the break by a multiple of MAX_ALIGN, so this settles
        // to zero after the first block.
        let misalign = self.brk.current().addr() & (MAX_ALIGN - 1);
        let pad = if misalign == 0 { 0 } else { MAX_ALIGN - misalign };

        let Some(total) = HEADER_SIZE
            .checked_add(padded)
            .and_then(|total| total.checked_add(pad))
        else {
            aerror!("request of {} bytes overflows the heap total", padded);
            return ptr::null_mut();
        };
        let Some(base) = self.brk.grow(total) else {
            aerror!("heap growth denied for {:#x} bytes", total);
            return ptr::null_mut();
        };
        atrace!("heap grown by {:#x} bytes at {:p}", total, base);

        // SAFETY: `base` is the start of `total` fresh bytes owned by us, and
        // `base + pad` is aligned for the header write.
        let header = unsafe { base.add(pad) }.cast::<BlockHeader>();
        // SAFETY: same region as above.
        unsafe { header.write(BlockHeader::new(padded)) };

        if self.head.is_null() {
            self.head = header;
        }
        if !self.tail.is_null() {
            // SAFETY: the tail is a listed header.
            unsafe { (*self.tail).next = header };
        }
        self.tail = header;
        self.allocation_balance += 1;

        // SAFETY: the header was just written into owned memory.
        unsafe { payload_of(header) }
    }

    /// Drops the tail from the list, rewiring its predecessor (found by a
    /// scan from the head) or emptying the list outright.
    fn unlink_tail(&mut self) {
        if self.head == self.tail {
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
            return;
        }
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: listed headers are valid.
            unsafe {
                if (*current).next == self.tail {
                    (*current).next = ptr::null_mut();
                    self.tail = current;
                    return;
                }
                current = (*current).next;
            }
        }
    }

    /// Live allocations minus deallocations. Zero when everything handed out
    /// has been returned.
    pub fn allocation_balance(&self) -> isize {
        self.allocation_balance
    }

    /// Count of listed headers, free and allocated.
    pub fn block_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while !current.is_null() {
            count += 1;
            // SAFETY: listed headers are valid.
            current = unsafe { (*current).next };
        }
        count
    }

    /// Count of listed headers currently marked free.
    pub fn free_block_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: listed headers are valid.
            unsafe {
                if (*current).is_free {
                    count += 1;
                }
                current = (*current).next;
            }
        }
        count
    }

    /// Read-only access to the break source, for inspection.
    pub fn break_source(&self) -> &B {
        &self.brk
    }

    /// Walks the whole list and panics on any structural violation: links
    /// that do not ascend, blocks overlapping the next header, a tail that is
    /// not the last listed header, or a tail running past the break.
    ///
    /// Diagnostics only. The allocate and deallocate paths never call this;
    /// they do not detect corruption, they rely on their caller contracts.
    #[track_caller]
    pub fn check_consistency(&self) {
        if self.head.is_null() || self.tail.is_null() {
            if self.head != self.tail {
                panic!("list has a head without a tail, or the reverse");
            }
            return;
        }

        let mut previous: *mut BlockHeader = ptr::null_mut();
        let mut current = self.head;
        while !current.is_null() {
            if !previous.is_null() {
                if current <= previous {
                    panic!("list order violated: {:p} is listed after {:p}", current, previous);
                }
                // SAFETY: `previous` is a listed header.
                if unsafe { payload_end(previous) } > current.cast() {
                    panic!("block {:p} overlaps the header at {:p}", previous, current);
                }
            }
            previous = current;
            // SAFETY: listed headers are valid.
            current = unsafe { (*current).next };
        }

        if previous != self.tail {
            panic!("tail {:p} is not the last listed header", self.tail);
        }
        // SAFETY: the tail is a listed header.
        let end = unsafe { payload_end(self.tail) };
        if end > self.brk.current() {
            panic!("tail payload ends at {:p}, past the break", end);
        }
    }
}

impl<B: BreakSource> Debug for ListAllocator<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListAllocator")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("break", &self.brk.current())
            .field("blocks", &self.block_count())
            .field("free_blocks", &self.free_block_count())
            .field("allocation_balance", &self.allocation_balance)
            .finish()
    }
}
