//! Page-backed allocation buckets.
//!
//! A bucket is a single anonymous mapping whose payload is partitioned
//! into equally-sized slots. The [`Bucket`] header sits at the start of
//! the mapping, immediately followed by the free bitmap (one `u32` word
//! per 32 slots, set bit = free slot) and then the payload, padded so
//! that the first slot starts on a 16-byte boundary. Slot sizes are
//! multiples of the alignment, so every slot inherits it.
//!
//! [`BucketAllocator`] keeps one intrusive list of buckets per size
//! class and services every small and medium request: walk the class
//! list for a bucket with a free slot, map a fresh bucket when there is
//! none, and claim the lowest free slot.

use std::mem;
use std::ptr::{self, NonNull};

use crate::heap::{HeapConfig, PATTERN_ALLOCATED_UNTOUCHED, PATTERN_FREED, PATTERN_NEVER_ALLOCATED};
use crate::list::{self, ListNode};
use crate::size_class::{align_up, SizeClass, ALIGNMENT, NUM_SIZE_CLASSES};

const WORD_BITS: usize = 32;

/// Default slot count for a fresh small-class bucket.
const DEFAULT_SMALL_CAPACITY: usize = 100;
/// Default slot count for a fresh medium-class bucket.
const DEFAULT_MEDIUM_CAPACITY: usize = 10;
/// Floor on the slot count of any bucket.
pub(crate) const MIN_BUCKET_CAPACITY: usize = 4;

/// Header at the start of every bucket mapping.
#[repr(C)]
pub(crate) struct Bucket {
    node: ListNode,
    total_mapped: usize,
    slot_size: usize,
    capacity: usize,
    occupied: usize,
}

pub(crate) const fn bookkeeping_words(capacity: usize) -> usize {
    (capacity + WORD_BITS - 1) / WORD_BITS
}

const fn bookkeeping_bytes(capacity: usize) -> usize {
    bookkeeping_words(capacity) * mem::size_of::<u32>()
}

/// Offset of the first slot from the start of the mapping.
pub(crate) const fn payload_offset(capacity: usize) -> usize {
    align_up(mem::size_of::<Bucket>() + bookkeeping_bytes(capacity), ALIGNMENT)
}

/// Bytes a bucket of `capacity` slots of `slot_size` occupies before
/// page rounding.
pub(crate) const fn required_size(slot_size: usize, capacity: usize) -> usize {
    payload_offset(capacity) + slot_size * capacity
}

/// Largest capacity whose header, bookkeeping, and payload fit in
/// `total` bytes.
fn capacity_for(total: usize, slot_size: usize) -> usize {
    debug_assert!(total >= required_size(slot_size, 1));
    let mut capacity = (total - mem::size_of::<Bucket>()) / slot_size;
    while required_size(slot_size, capacity) > total {
        capacity -= 1;
    }
    capacity
}

const fn default_capacity(class: SizeClass) -> usize {
    let capacity = if class.is_small() {
        DEFAULT_SMALL_CAPACITY
    } else {
        DEFAULT_MEDIUM_CAPACITY
    };
    if capacity < MIN_BUCKET_CAPACITY {
        MIN_BUCKET_CAPACITY
    } else {
        capacity
    }
}

impl Bucket {
    pub(crate) const fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) const fn occupied(&self) -> usize {
        self.occupied
    }

    pub(crate) const fn total_mapped(&self) -> usize {
        self.total_mapped
    }

    pub(crate) const fn has_free_slot(&self) -> bool {
        self.occupied < self.capacity
    }

    fn base(&self) -> *mut u8 {
        ptr::from_ref(self).cast::<u8>().cast_mut()
    }

    fn bitmap(&self) -> *mut u32 {
        // The bitmap sits immediately after the header.
        unsafe { self.base().add(mem::size_of::<Self>()).cast::<u32>() }
    }

    pub(crate) fn payload_start(&self) -> *mut u8 {
        unsafe { self.base().add(payload_offset(self.capacity)) }
    }

    /// Address of slot `index`.
    pub(crate) fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        unsafe { self.payload_start().add(index * self.slot_size) }
    }

    /// Slot index of `ptr`, or `None` when `ptr` lies outside the
    /// payload (header and bookkeeping included) or is not
    /// slot-aligned.
    pub(crate) fn slot_index(&self, ptr: *const u8) -> Option<usize> {
        let start = self.payload_start() as usize;
        let addr = ptr as usize;
        if addr < start || addr >= start + self.slot_size * self.capacity {
            return None;
        }
        let offset = addr - start;
        if offset % self.slot_size != 0 {
            return None;
        }
        Some(offset / self.slot_size)
    }

    pub(crate) fn is_slot_free(&self, index: usize) -> bool {
        debug_assert!(index < self.capacity);
        let word = unsafe { *self.bitmap().add(index / WORD_BITS) };
        (word >> (index % WORD_BITS)) & 1 == 1
    }

    /// Claims the lowest-index free slot and returns its address.
    ///
    /// Words are scanned in ascending order; within a word the lowest
    /// set bit wins (`trailing_zeros`, 0-based). The caller must have
    /// checked [`Self::has_free_slot`].
    ///
    /// # Safety
    ///
    /// `self` must be the header of a live bucket mapping.
    pub(crate) unsafe fn claim_first_free(&mut self, config: &HeapConfig) -> NonNull<u8> {
        assert!(self.has_free_slot(), "claiming a slot from a full bucket");

        let bitmap = self.bitmap();
        for word_index in 0..bookkeeping_words(self.capacity) {
            let word = unsafe { *bitmap.add(word_index) };
            let bit = word.trailing_zeros() as usize;
            if bit == WORD_BITS {
                continue;
            }

            unsafe { *bitmap.add(word_index) = word & !(1u32 << bit) };
            let index = word_index * WORD_BITS + bit;
            // Trailing bits past capacity are initialised occupied, so
            // the scan can only land on a real slot.
            debug_assert!(index < self.capacity);
            self.occupied += 1;

            let slot = self.slot_ptr(index);
            if config.poison {
                unsafe { ptr::write_bytes(slot, PATTERN_ALLOCATED_UNTOUCHED, self.slot_size) };
            }
            return unsafe { NonNull::new_unchecked(slot) };
        }

        unreachable!("bucket with occupied < capacity has no free bit");
    }

    /// Marks slot `index` free again.
    ///
    /// Panics if the slot is already free.
    ///
    /// # Safety
    ///
    /// `self` must be the header of a live bucket mapping and `index`
    /// must come from [`Self::slot_index`].
    pub(crate) unsafe fn release_slot(&mut self, index: usize, config: &HeapConfig) {
        assert!(index < self.capacity);
        let bitmap = self.bitmap();
        let word_index = index / WORD_BITS;
        let bit = index % WORD_BITS;

        let word = unsafe { *bitmap.add(word_index) };
        assert!(
            (word >> bit) & 1 == 0,
            "double free of slot {index} (slot size {})",
            self.slot_size
        );

        unsafe { *bitmap.add(word_index) = word | (1u32 << bit) };
        self.occupied -= 1;

        if config.poison {
            unsafe { ptr::write_bytes(self.slot_ptr(index), PATTERN_FREED, self.slot_size) };
        }
    }
}

/// Maps a fresh bucket for `class` with at least `capacity` slots, all
/// free. Page rounding may leave room for more slots; the surplus is
/// kept. Returns `None` when the OS refuses the mapping.
pub(crate) fn create(
    class: SizeClass,
    capacity: usize,
    config: &HeapConfig,
) -> Option<NonNull<Bucket>> {
    let len = sys_pages::align_to_page(required_size(class.slot_size, capacity));
    let mapping = sys_pages::map_anon(len).ok()?;

    let capacity = capacity_for(len, class.slot_size);
    let bucket = mapping.cast::<Bucket>();

    unsafe {
        bucket.as_ptr().write(Bucket {
            node: ListNode::new(),
            total_mapped: len,
            slot_size: class.slot_size,
            capacity,
            occupied: 0,
        });

        let bitmap = bucket.as_ref().bitmap();
        for word_index in 0..bookkeeping_words(capacity) {
            let slots_in_word = (capacity - word_index * WORD_BITS).min(WORD_BITS);
            *bitmap.add(word_index) = if slots_in_word == WORD_BITS {
                u32::MAX
            } else {
                (1u32 << slots_in_word) - 1
            };
        }

        if config.poison {
            ptr::write_bytes(
                bucket.as_ref().payload_start(),
                PATTERN_NEVER_ALLOCATED,
                class.slot_size * capacity,
            );
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        slot_size = class.slot_size,
        mapped = len,
        capacity,
        "created bucket"
    );

    Some(bucket)
}

/// Returns a bucket's mapping to the OS. The bucket must already be
/// unlinked from its class list.
///
/// # Safety
///
/// `bucket` must be the header of a live bucket mapping; the mapping
/// must not be touched afterwards.
pub(crate) unsafe fn destroy(bucket: NonNull<Bucket>) {
    let len = unsafe { bucket.as_ref().total_mapped };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        slot_size = unsafe { bucket.as_ref().slot_size },
        mapped = len,
        "destroying bucket"
    );

    let _ = unsafe { sys_pages::unmap(bucket.cast::<u8>(), len) };
}

/// Per-size-class bucket collection servicing every small and medium
/// request.
pub(crate) struct BucketAllocator {
    class_heads: [*mut ListNode; NUM_SIZE_CLASSES],
}

impl BucketAllocator {
    pub(crate) const fn new() -> Self {
        Self {
            class_heads: [ptr::null_mut(); NUM_SIZE_CLASSES],
        }
    }

    /// Allocates one slot of `class`, mapping a new bucket when no
    /// bucket of the class has a free slot. Null on mapping failure.
    pub(crate) fn alloc(&mut self, class: SizeClass, config: &HeapConfig) -> *mut u8 {
        let mut cursor = self.class_heads[class.index];
        while !cursor.is_null() {
            let bucket = unsafe { &mut *cursor.cast::<Bucket>() };
            if bucket.has_free_slot() {
                return unsafe { bucket.claim_first_free(config).as_ptr() };
            }
            cursor = bucket.node.next;
        }

        let Some(bucket) = create(class, default_capacity(class), config) else {
            return ptr::null_mut();
        };
        unsafe {
            list::push_front(&mut self.class_heads[class.index], bucket.as_ptr().cast());
            if config.verify_lists {
                list::verify(self.class_heads[class.index]);
            }
            (*bucket.as_ptr()).claim_first_free(config).as_ptr()
        }
    }

    /// Finds the bucket whose payload contains `ptr` at a slot-aligned
    /// offset, together with the slot index. Occupancy is not checked
    /// here so that free can tell "double free" apart from "never
    /// ours".
    pub(crate) fn find_owner(&self, ptr: *const u8) -> Option<(NonNull<Bucket>, usize)> {
        for bucket in self.iter() {
            if let Some(index) = bucket.slot_index(ptr) {
                return Some((NonNull::from(bucket), index));
            }
        }
        None
    }

    pub(crate) fn iter(&self) -> BucketIter<'_> {
        BucketIter {
            allocator: self,
            class: 0,
            cursor: ptr::null_mut(),
        }
    }

    /// Destroys every bucket. Slots still occupied are abandoned with
    /// their bucket; the caller leaked them.
    pub(crate) fn cleanup(&mut self) {
        for head in &mut self.class_heads {
            while !head.is_null() {
                let node = *head;
                unsafe {
                    list::remove(head, node);
                    destroy(NonNull::new_unchecked(node.cast::<Bucket>()));
                }
            }
        }
    }
}

pub(crate) struct BucketIter<'a> {
    allocator: &'a BucketAllocator,
    class: usize,
    cursor: *mut ListNode,
}

impl<'a> Iterator for BucketIter<'a> {
    type Item = &'a Bucket;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor.is_null() {
            if self.class == NUM_SIZE_CLASSES {
                return None;
            }
            self.cursor = self.allocator.class_heads[self.class];
            self.class += 1;
        }

        let bucket = unsafe { &*self.cursor.cast::<Bucket>() };
        self.cursor = bucket.node.next;
        Some(bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_class::classify;

    fn config() -> HeapConfig {
        HeapConfig::new()
    }

    #[test]
    fn test_create_rounds_capacity_up_to_the_mapping() {
        let class = classify(64).unwrap();
        let bucket = create(class, 100, &config()).expect("mapping failed");
        let bucket_ref = unsafe { bucket.as_ref() };

        assert_eq!(bucket_ref.total_mapped() % sys_pages::page_size(), 0);
        assert!(bucket_ref.capacity() >= 100);
        // Capacity is maximal for the rounded mapping.
        assert!(required_size(64, bucket_ref.capacity()) <= bucket_ref.total_mapped());
        assert!(required_size(64, bucket_ref.capacity() + 1) > bucket_ref.total_mapped());
        assert_eq!(bucket_ref.occupied(), 0);

        unsafe { destroy(bucket) };
    }

    #[test]
    fn test_payload_is_aligned() {
        let class = classify(40).unwrap();
        let bucket = create(class, 10, &config()).expect("mapping failed");
        let bucket_ref = unsafe { bucket.as_ref() };

        assert_eq!(bucket_ref.payload_start() as usize % ALIGNMENT, 0);
        for index in 0..bucket_ref.capacity() {
            assert_eq!(bucket_ref.slot_ptr(index) as usize % ALIGNMENT, 0);
        }

        unsafe { destroy(bucket) };
    }

    #[test]
    fn test_claim_takes_lowest_free_slot() {
        let class = classify(32).unwrap();
        let bucket = create(class, 100, &config()).expect("mapping failed");
        let bucket_mut = unsafe { &mut *bucket.as_ptr() };

        let first = unsafe { bucket_mut.claim_first_free(&config()) };
        let second = unsafe { bucket_mut.claim_first_free(&config()) };
        assert_eq!(first.as_ptr(), bucket_mut.slot_ptr(0));
        assert_eq!(second.as_ptr(), bucket_mut.slot_ptr(1));

        unsafe { bucket_mut.release_slot(0, &config()) };
        let reclaimed = unsafe { bucket_mut.claim_first_free(&config()) };
        assert_eq!(reclaimed.as_ptr(), bucket_mut.slot_ptr(0));

        unsafe { destroy(bucket) };
    }

    #[test]
    fn test_bucket_fills_to_exact_capacity() {
        // A capacity that is not a multiple of 32 exercises the
        // trailing-bit masking in the last bitmap word.
        let class = classify(96).unwrap();
        let bucket = create(class, 33, &config()).expect("mapping failed");
        let bucket_mut = unsafe { &mut *bucket.as_ptr() };
        let capacity = bucket_mut.capacity();

        for index in 0..capacity {
            assert!(bucket_mut.has_free_slot());
            let slot = unsafe { bucket_mut.claim_first_free(&config()) };
            assert_eq!(slot.as_ptr(), bucket_mut.slot_ptr(index));
        }
        assert!(!bucket_mut.has_free_slot());
        assert_eq!(bucket_mut.occupied(), capacity);

        unsafe { destroy(bucket) };
    }

    #[test]
    fn test_slot_index_rejects_foreign_and_misaligned_pointers() {
        let class = classify(64).unwrap();
        let bucket = create(class, 10, &config()).expect("mapping failed");
        let bucket_ref = unsafe { bucket.as_ref() };

        // Inside the bookkeeping region.
        let header_ptr = bucket.as_ptr().cast::<u8>();
        assert_eq!(bucket_ref.slot_index(header_ptr), None);
        let bookkeeping_ptr = unsafe { header_ptr.add(mem::size_of::<Bucket>()) };
        assert_eq!(bucket_ref.slot_index(bookkeeping_ptr), None);

        // Interior of a slot.
        let interior = unsafe { bucket_ref.slot_ptr(0).add(8) };
        assert_eq!(bucket_ref.slot_index(interior), None);

        // One past the payload.
        let past = unsafe {
            bucket_ref
                .payload_start()
                .add(bucket_ref.capacity() * bucket_ref.slot_size())
        };
        assert_eq!(bucket_ref.slot_index(past), None);

        assert_eq!(bucket_ref.slot_index(bucket_ref.slot_ptr(3)), Some(3));

        unsafe { destroy(bucket) };
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_release_free_slot_panics() {
        let class = classify(32).unwrap();
        let bucket = create(class, 10, &config()).expect("mapping failed");
        let bucket_mut = unsafe { &mut *bucket.as_ptr() };

        unsafe {
            bucket_mut.claim_first_free(&config());
            bucket_mut.release_slot(0, &config());
            bucket_mut.release_slot(0, &config());
        }
    }

    #[test]
    fn test_allocator_reuses_buckets_until_full() {
        let mut allocator = BucketAllocator::new();
        let class = classify(64).unwrap();

        let first = allocator.alloc(class, &config());
        assert!(!first.is_null());
        assert_eq!(allocator.iter().count(), 1);

        let capacity = allocator.iter().next().unwrap().capacity();
        for _ in 1..capacity {
            assert!(!allocator.alloc(class, &config()).is_null());
        }
        assert_eq!(allocator.iter().count(), 1);

        // The class is full now; the next slot needs a second bucket.
        assert!(!allocator.alloc(class, &config()).is_null());
        assert_eq!(allocator.iter().count(), 2);

        allocator.cleanup();
        assert_eq!(allocator.iter().count(), 0);
    }

    #[test]
    fn test_find_owner_spans_classes() {
        let mut allocator = BucketAllocator::new();
        let small = allocator.alloc(classify(48).unwrap(), &config());
        let medium = allocator.alloc(classify(2000).unwrap(), &config());

        let (small_bucket, small_index) = allocator.find_owner(small).unwrap();
        assert_eq!(unsafe { small_bucket.as_ref() }.slot_size(), 48);
        assert_eq!(small_index, 0);

        let (medium_bucket, _) = allocator.find_owner(medium).unwrap();
        assert_eq!(unsafe { medium_bucket.as_ref() }.slot_size(), 2000);

        assert!(allocator.find_owner(ptr::null()).is_none());

        allocator.cleanup();
    }
}
