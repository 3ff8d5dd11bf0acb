//! libc-compatible symbol exports (`override-libc` feature).
//!
//! Only the three routines the allocator actually replaces are
//! provided; calloc, aligned allocation, and the rest of the libc
//! allocator family stay with libc. The symbols must bind ahead of
//! libc's for interposition to take effect (link the crate into the
//! final binary or preload it as a shared object).

use core::ffi::c_void;

/// `malloc(3)` against the calling thread's default heap.
#[no_mangle]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    crate::global::alloc(size).cast::<c_void>()
}

/// `free(3)` against the calling thread's default heap.
///
/// # Safety
///
/// As for [`crate::global::free`].
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    unsafe { crate::global::free(ptr.cast::<u8>()) };
}

/// `realloc(3)` against the calling thread's default heap.
///
/// # Safety
///
/// As for [`crate::global::resize`].
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, new_size: usize) -> *mut c_void {
    unsafe { crate::global::resize(ptr.cast::<u8>(), new_size).cast::<c_void>() }
}
