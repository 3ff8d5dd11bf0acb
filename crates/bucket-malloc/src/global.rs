//! The default heap and the no-handle entry points.
//!
//! The classical `alloc`/`free`/`resize` surface operates on a
//! per-thread default heap. The heap is const-initialised, so first
//! use never allocates through the allocator itself, which is what
//! lets the `override-libc` symbols delegate here without re-entering
//! themselves. A heap is not safe under concurrent mutation; sharding
//! the default heap per thread is the single-threaded core's answer
//! to that (see the crate docs for the trade-off).

use std::cell::RefCell;
use std::io;

use crate::heap::Heap;
use crate::stats::AllocationStats;

thread_local! {
    static DEFAULT_HEAP: RefCell<Heap> = const { RefCell::new(Heap::new()) };
}

/// Runs `f` with exclusive access to the calling thread's default
/// heap.
///
/// # Panics
///
/// Panics if called re-entrantly from within another
/// `with_global_heap` closure on the same thread.
pub fn with_global_heap<F, R>(f: F) -> R
where
    F: FnOnce(&mut Heap) -> R,
{
    DEFAULT_HEAP.with(|heap| f(&mut heap.borrow_mut()))
}

/// Allocates `size` bytes from the default heap. See [`Heap::alloc`].
#[must_use]
pub fn alloc(size: usize) -> *mut u8 {
    with_global_heap(|heap| heap.alloc(size))
}

/// Releases an allocation of the default heap. See [`Heap::free`].
///
/// # Safety
///
/// As for [`Heap::free`], against the calling thread's default heap.
pub unsafe fn free(ptr: *mut u8) {
    with_global_heap(|heap| unsafe { heap.free(ptr) });
}

/// Resizes an allocation of the default heap. See [`Heap::resize`].
///
/// # Safety
///
/// As for [`Heap::resize`], against the calling thread's default heap.
#[must_use]
pub unsafe fn resize(ptr: *mut u8, new_size: usize) -> *mut u8 {
    with_global_heap(|heap| unsafe { heap.resize(ptr, new_size) })
}

/// Releases every mapping of the calling thread's default heap and
/// resets it to a fresh state. Outstanding allocations are abandoned
/// with their mappings.
pub fn destroy_global_heap() {
    with_global_heap(|heap| *heap = Heap::new());
}

/// Statistics of the default heap. See [`Heap::stats`].
#[must_use]
pub fn allocation_stats() -> AllocationStats {
    with_global_heap(|heap| heap.stats())
}

/// Prints the default heap's bucket and large-allocation breakdown to
/// stdout. See [`Heap::dump_state`].
pub fn print_allocation_state() {
    let _ = with_global_heap(|heap| {
        let stdout = io::stdout();
        heap.dump_state(&mut stdout.lock())
    });
}

/// Prints every live allocation of the default heap to stdout in
/// ascending address order. See [`Heap::dump_live`].
pub fn show_alloc_mem() {
    let _ = with_global_heap(|heap| {
        let stdout = io::stdout();
        heap.dump_live(&mut stdout.lock())
    });
}
