//! A general-purpose memory allocator built on anonymous page
//! mappings.
//!
//! `bucket-malloc` serves requests of arbitrary byte size with
//! 16-byte-aligned, non-overlapping memory obtained directly from the
//! OS, bypassing the platform allocator entirely. Small and medium
//! requests (up to ~27 KB by default) share page-backed **buckets**
//! subdivided into fixed-size slots, tracked by a free bitmap; larger
//! requests each get a dedicated mapping with a small header in front
//! of the payload.
//!
//! # Features
//!
//! - **Explicit heaps**: [`Heap`] is an independent allocation domain;
//!   create as many as needed, every mapping is released on drop.
//! - **Default heap**: the classical no-handle [`alloc`]/[`free`]/
//!   [`resize`] triple against a per-thread default heap, plus an
//!   optional `override-libc` feature exporting `malloc`, `free`, and
//!   `realloc`.
//! - **Introspection**: [`AllocationStats`], a per-bucket state dump,
//!   and [`show_alloc_mem`] listing every live allocation in address
//!   order.
//! - **Debugging aids**: optional memory poisoning and list integrity
//!   verification via [`HeapConfig`], optional `tracing` events behind
//!   the `tracing` feature.
//!
//! # Quick start
//!
//! ```
//! use bucket_malloc::Heap;
//!
//! let mut heap = Heap::new();
//! let p = heap.alloc(100);
//! assert!(!p.is_null());
//! assert_eq!(p as usize % 16, 0);
//!
//! unsafe {
//!     p.write_bytes(0x42, 100);
//!     let p = heap.resize(p, 5000);
//!     assert_eq!(*p, 0x42);
//!     heap.free(p);
//! }
//! ```
//!
//! # Concurrency
//!
//! A heap is single-threaded: it executes every operation to
//! completion with no internal locking, and it is `Send` but not
//! `Sync`. Callers that need shared access wrap a heap in a mutex or
//! shard by thread. The default heap takes the latter route, so a
//! pointer allocated through [`alloc`] must be freed on the thread
//! that allocated it.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]

// Slot indices, bitmap words, and page arithmetic all assume 64-bit
// addresses, as does MAX_SIZE.
const _: () = assert!(std::mem::size_of::<usize>() == 8, "64-bit targets only");

mod bucket;
#[cfg(feature = "override-libc")]
mod ffi;
mod global;
mod heap;
mod large;
mod list;
mod size_class;
mod stats;

pub use global::{
    alloc, allocation_stats, destroy_global_heap, free, print_allocation_state, resize,
    show_alloc_mem, with_global_heap,
};
pub use heap::{
    Heap, HeapConfig, LargeThreshold, PATTERN_ALLOCATED_UNTOUCHED, PATTERN_FREED,
    PATTERN_NEVER_ALLOCATED,
};
pub use size_class::{
    classify, SizeClass, ALIGNMENT, MAX_MEDIUM_SIZE, MAX_SIZE, MAX_SMALL_SIZE,
    MEDIUM_GRANULARITY, MIN_SIZE, NUM_MEDIUM_CLASSES, NUM_SIZE_CLASSES, NUM_SMALL_CLASSES,
    SMALL_GRANULARITY,
};
pub use stats::AllocationStats;
