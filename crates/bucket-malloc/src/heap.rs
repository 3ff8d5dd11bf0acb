//! The heap object and the dispatch between the two allocation paths.
//!
//! A [`Heap`] owns one bucket list per size class and the list of
//! outstanding large mappings. Allocation routes on size: bucketed
//! classes below the configured large threshold, a dedicated mapping
//! for everything else. Free and resize route by recovering the owner
//! from the pointer: the large list is scanned first, then the bucket
//! payload ranges. A pointer neither path recognises is a caller bug
//! and panics.

use std::ptr;

use crate::bucket::BucketAllocator;
use crate::large::{LargeAllocator, LargeHeader};
use crate::size_class::{classify, ALIGNMENT, MAX_SIZE};

/// Fill byte for slots that have never been handed out
/// (with [`HeapConfig::poison`]).
pub const PATTERN_NEVER_ALLOCATED: u8 = 0xfe;
/// Fill byte for freshly claimed, not yet written allocations.
pub const PATTERN_ALLOCATED_UNTOUCHED: u8 = 0xce;
/// Fill byte for freed slots.
pub const PATTERN_FREED: u8 = 0xcd;

/// Boundary above which a request gets its own mapping instead of a
/// bucket slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LargeThreshold {
    /// Absolute byte count.
    Bytes(usize),
    /// Multiple of the OS page size.
    Pages(usize),
}

impl LargeThreshold {
    /// The threshold in bytes.
    #[must_use]
    pub fn in_bytes(self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes,
            Self::Pages(pages) => pages * sys_pages::page_size(),
        }
    }
}

/// Per-heap configuration, fixed at heap creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Requests of at least this size take the large path. Requests
    /// beyond the bucketed size classes take it regardless.
    pub large_threshold: LargeThreshold,
    /// Fill payloads with the `PATTERN_*` bytes on bucket creation,
    /// claim, and free.
    pub poison: bool,
    /// Walk the full bucket and large lists after every list mutation,
    /// panicking on an inconsistency.
    pub verify_lists: bool,
}

impl HeapConfig {
    /// The default configuration: large threshold of 4 pages, no
    /// poisoning, no list verification.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            large_threshold: LargeThreshold::Pages(4),
            poison: false,
            verify_lists: false,
        }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An independent allocation domain.
///
/// Every mapping the heap creates is released when the heap is
/// dropped; allocations still live at that point are abandoned with
/// their mapping.
pub struct Heap {
    config: HeapConfig,
    buckets: BucketAllocator,
    large: LargeAllocator,
}

// A heap's mappings are process-wide, not thread-affine; moving the
// heap to another thread is sound. Concurrent access is not, hence no
// Sync.
unsafe impl Send for Heap {}

impl Heap {
    /// Creates an empty heap with the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    /// Creates an empty heap with an explicit configuration.
    #[must_use]
    pub const fn with_config(config: HeapConfig) -> Self {
        Self {
            config,
            buckets: BucketAllocator::new(),
            large: LargeAllocator::new(),
        }
    }

    /// This heap's configuration.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates `size` bytes, 16-byte aligned.
    ///
    /// Returns null when `size` is 0, exceeds [`MAX_SIZE`], or the OS
    /// refuses the backing mapping; the heap is unchanged in every
    /// failure case.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 || size > MAX_SIZE {
            return ptr::null_mut();
        }

        let threshold = self.config.large_threshold.in_bytes();
        let ptr = match classify(size) {
            Some(class) if size < threshold => self.buckets.alloc(class, &self.config),
            _ => self.large.alloc(size, &self.config),
        };

        assert!(
            ptr as usize % ALIGNMENT == 0,
            "allocator produced a misaligned pointer"
        );
        ptr
    }

    /// Releases an allocation. `free(null)` is a no-op.
    ///
    /// Panics if `ptr` is non-null and not a live allocation of this
    /// heap (never returned by it, already freed, or pointing into
    /// the middle of an allocation).
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this heap's
    /// [`alloc`](Self::alloc)/[`resize`](Self::resize), and must not
    /// be used afterwards.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        if self.large.contains(ptr) {
            unsafe { self.large.free(ptr, &self.config) };
        } else if let Some((bucket, index)) = self.buckets.find_owner(ptr) {
            unsafe { (*bucket.as_ptr()).release_slot(index, &self.config) };
        } else {
            panic!("free of pointer {ptr:p} that was not allocated by this heap");
        }
    }

    /// Grows or shrinks an allocation to `new_size` bytes, preserving
    /// the first `min(old, new)` bytes.
    ///
    /// `resize(null, n)` is `alloc(n)`; `resize(ptr, 0)` and a
    /// `new_size` beyond [`MAX_SIZE`] free `ptr` and return null. The
    /// pointer is reused without moving when the new size stays in the
    /// allocation's size class (bucket path) or within the mapping's
    /// page count (large path). When moving is needed and the fresh
    /// allocation fails, null is returned and `ptr` stays live.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this heap's
    /// [`alloc`](Self::alloc)/[`resize`](Self::resize); when resize
    /// returns a different pointer (or null after freeing), the old
    /// pointer must not be used afterwards.
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc(new_size);
        }
        if new_size == 0 || new_size > MAX_SIZE {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }

        if self.large.contains(ptr) {
            if unsafe { self.large.try_resize_in_place(ptr, new_size) } {
                return ptr;
            }

            let old_size = unsafe { (*LargeHeader::of(ptr)).size() };
            let new_ptr = self.alloc(new_size);
            if new_ptr.is_null() {
                return ptr::null_mut();
            }
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
                self.large.free(ptr, &self.config);
            }
            new_ptr
        } else if let Some((bucket, index)) = self.buckets.find_owner(ptr) {
            let bucket = bucket.as_ptr();
            assert!(
                !unsafe { (*bucket).is_slot_free(index) },
                "resize of pointer {ptr:p} whose slot is already free"
            );

            // Recorded size of a bucket allocation is its slot size.
            let slot_size = unsafe { (*bucket).slot_size() };
            if classify(new_size).is_some_and(|class| class.slot_size == slot_size) {
                return ptr;
            }

            let new_ptr = self.alloc(new_size);
            if new_ptr.is_null() {
                return ptr::null_mut();
            }
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, slot_size.min(new_size));
                (*bucket).release_slot(index, &self.config);
            }
            new_ptr
        } else {
            panic!("resize of pointer {ptr:p} that was not allocated by this heap");
        }
    }

    pub(crate) const fn bucket_allocator(&self) -> &BucketAllocator {
        &self.buckets
    }

    pub(crate) const fn large_allocator(&self) -> &LargeAllocator {
        &self.large
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.buckets.cleanup();
        self.large.cleanup(&self.config);
    }
}
