//! In-band block metadata.
//!
//! Every block on the heap starts with a header and the payload follows
//! [`HEADER_SIZE`] bytes after it. The conversion functions at the bottom are
//! the only place in the crate where that offset is applied; everything else
//! handles whole headers or whole payloads.

use core::mem;

/// The worst-case scalar alignment of the platform.
///
/// Payloads are handed out on this boundary, so any type fits without the
/// allocator knowing its layout.
pub const MAX_ALIGN: usize = mem::align_of::<libc::max_align_t>();

/// Bytes between a block header and its payload: the header struct padded up
/// to [`MAX_ALIGN`] so the payload lands on a worst-case boundary.
pub const HEADER_SIZE: usize = (mem::size_of::<BlockHeader>() + MAX_ALIGN - 1) & !(MAX_ALIGN - 1);

/// The bookkeeping that precedes every allocated block.
#[derive(Debug)]
#[repr(C)] // Keep the in-band layout fixed.
pub(crate) struct BlockHeader {
    /// Payload bytes recorded for this block. Overwritten on reuse, so this
    /// is the last requested (padded) size, not the block's true capacity.
    pub(crate) size: usize,
    /// Is the block free or allocated.
    pub(crate) is_free: bool,
    /// The next header in ascending address order, null for the tail.
    pub(crate) next: *mut BlockHeader,
}

impl BlockHeader {
    /// Creates the header for a freshly grown block.
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            is_free: false,
            next: core::ptr::null_mut(),
        }
    }
}

/// Rounds a requested size up to [`MAX_ALIGN`]. `None` when the request is so
/// large that padding it overflows.
pub const fn pad_request(size: usize) -> Option<usize> {
    match size.checked_add(MAX_ALIGN - 1) {
        Some(padded) => Some(padded & !(MAX_ALIGN - 1)),
        None => None,
    }
}

/// Returns the payload a header precedes.
///
/// # Safety
///
/// `header` must point at a live block header.
pub(crate) unsafe fn payload_of(header: *mut BlockHeader) -> *mut u8 {
    unsafe { header.cast::<u8>().add(HEADER_SIZE) }
}

/// Recovers the header preceding a payload.
///
/// # Safety
///
/// `payload` must have come from [`payload_of`] for a header that is still
/// live.
pub(crate) unsafe fn header_of(payload: *mut u8) -> *mut BlockHeader {
    unsafe { payload.sub(HEADER_SIZE) }.cast()
}

/// Returns one past the last payload byte the header records.
///
/// # Safety
///
/// `header` must point at a live block header.
pub(crate) unsafe fn payload_end(header: *mut BlockHeader) -> *mut u8 {
    unsafe { payload_of(header).add((*header).size) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_align_is_power_of_two() {
        assert!(MAX_ALIGN.is_power_of_two());
        assert!(MAX_ALIGN >= mem::align_of::<usize>());
    }

    #[test]
    fn test_header_size_is_padded() {
        assert_eq!(HEADER_SIZE % MAX_ALIGN, 0);
        assert!(HEADER_SIZE >= mem::size_of::<BlockHeader>());
        assert!(HEADER_SIZE < mem::size_of::<BlockHeader>() + MAX_ALIGN);
    }

    #[test]
    fn test_pad_request_rounds_up() {
        assert_eq!(pad_request(1), Some(MAX_ALIGN));
        assert_eq!(pad_request(MAX_ALIGN - 1), Some(MAX_ALIGN));
        assert_eq!(pad_request(MAX_ALIGN), Some(MAX_ALIGN));
        assert_eq!(pad_request(MAX_ALIGN + 1), Some(2 * MAX_ALIGN));
    }

    #[test]
    fn test_pad_request_overflow() {
        assert_eq!(pad_request(usize::MAX), None);
        assert_eq!(pad_request(usize::MAX - MAX_ALIGN + 2), None);
        // The largest request that still pads cleanly.
        assert_eq!(
            pad_request(usize::MAX - MAX_ALIGN + 1),
            Some(usize::MAX - MAX_ALIGN + 1)
        );
    }

    #[test]
    fn test_payload_header_roundtrip() {
        let mut backing = vec![0u8; HEADER_SIZE * 2 + MAX_ALIGN];
        let offset = backing.as_mut_ptr().align_offset(MAX_ALIGN);
        let header = unsafe { backing.as_mut_ptr().add(offset) }.cast::<BlockHeader>();
        unsafe { header.write(BlockHeader::new(MAX_ALIGN)) };

        let payload = unsafe { payload_of(header) };
        assert_eq!(payload.addr() - header.addr(), HEADER_SIZE);
        assert_eq!(payload.addr() & (MAX_ALIGN - 1), 0);
        assert_eq!(unsafe { header_of(payload) }, header);
        assert_eq!(
            unsafe { payload_end(header) }.addr(),
            payload.addr() + MAX_ALIGN
        );
    }
}
