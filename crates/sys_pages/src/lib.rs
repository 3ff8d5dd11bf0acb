//! Anonymous page mapping primitives.
//!
//! This crate is the only place in the allocator that talks to the OS
//! memory subsystem: it maps anonymous read/write pages, unmaps them,
//! and reports the system page size. Everything above it (buckets,
//! large allocations, heaps) treats mappings as raw byte regions whose
//! metadata lives inside the region itself, so the functions here hand
//! out raw pointers rather than owning handles.

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Rounds `len` up to a whole number of system pages.
///
/// `align_to_page(0)` is 0; the result is always a multiple of
/// [`page_size`].
#[must_use]
pub fn align_to_page(len: usize) -> usize {
    let page = page_size();
    let rem = len % page;
    if rem == 0 {
        len
    } else {
        len + (page - rem)
    }
}

/// Maps `len` bytes of zeroed, anonymous, private read/write memory.
///
/// `len` does not have to be page-aligned, but callers in this
/// workspace always pass a multiple of [`page_size`] because the OS
/// hands out whole pages either way. The returned pointer is
/// page-aligned.
///
/// The mapping is not tracked; release it with [`unmap`], passing the
/// same length.
///
/// # Errors
///
/// Returns the underlying OS error when the mapping cannot be
/// established (address space or commit limit exhausted), or
/// `InvalidInput` when `len` is 0.
pub fn map_anon(len: usize) -> io::Result<NonNull<u8>> {
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "length must be greater than 0",
        ));
    }
    os::map_anon(len)
}

/// Unmaps a region previously returned by [`map_anon`].
///
/// # Safety
///
/// `ptr` must be the exact pointer returned by [`map_anon`] and `len`
/// the exact length passed to it, and the region must not be accessed
/// afterwards.
///
/// # Errors
///
/// Returns the underlying OS error if the region could not be
/// released.
pub unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    unsafe { os::unmap(ptr, len) }
}
