//! End-to-end allocation behaviour against explicit heaps.

use bucket_malloc::{classify, Heap, ALIGNMENT, MAX_SIZE};

#[test]
fn test_small_allocations_are_aligned_and_disjoint() {
    let mut heap = Heap::new();

    let p1 = heap.alloc(32);
    let p2 = heap.alloc(48);
    assert!(!p1.is_null());
    assert!(!p2.is_null());
    assert_ne!(p1, p2);
    assert_eq!(p1 as usize % ALIGNMENT, 0);
    assert_eq!(p2 as usize % ALIGNMENT, 0);

    unsafe {
        heap.free(p1);
        heap.free(p2);
    }
    assert_eq!(heap.stats().total_allocations, 0);
}

#[test]
fn test_alignment_across_all_regimes() {
    let mut heap = Heap::new();
    let sizes = [
        1, 15, 16, 31, 32, 33, 100, 1000, 1616, 1617, 5000, 16383, 16384, 20000, 40000,
    ];

    let ptrs: Vec<*mut u8> = sizes.iter().map(|&size| heap.alloc(size)).collect();
    for (&size, &ptr) in sizes.iter().zip(&ptrs) {
        assert!(!ptr.is_null(), "allocation of {size} bytes failed");
        assert_eq!(ptr as usize % ALIGNMENT, 0, "misaligned at size {size}");
    }

    for &ptr in &ptrs {
        unsafe { heap.free(ptr) };
    }
    assert_eq!(heap.stats().total_allocations, 0);
}

#[test]
fn test_allocations_do_not_overlap() {
    let mut heap = Heap::new();

    let count = 300;
    let ptrs: Vec<*mut u8> = (0..count).map(|_| heap.alloc(48)).collect();
    for (i, &ptr) in ptrs.iter().enumerate() {
        unsafe { ptr.write_bytes(i as u8, 48) };
    }
    // Any overlap would have clobbered an earlier fill.
    for (i, &ptr) in ptrs.iter().enumerate() {
        for offset in 0..48 {
            assert_eq!(unsafe { *ptr.add(offset) }, i as u8);
        }
    }

    for &ptr in &ptrs {
        unsafe { heap.free(ptr) };
    }
}

#[test]
fn test_every_byte_of_an_allocation_is_usable() {
    let mut heap = Heap::new();

    for size in [32, 208, 1616, 2000, 27216, 30000] {
        let ptr = heap.alloc(size);
        unsafe {
            for offset in 0..size {
                ptr.add(offset).write((offset % 251) as u8);
            }
            for offset in 0..size {
                assert_eq!(*ptr.add(offset), (offset % 251) as u8);
            }
            heap.free(ptr);
        }
    }
}

#[test]
fn test_resize_through_the_size_classes_preserves_data() {
    let mut heap = Heap::new();

    // 200 bytes classifies into the 208-byte small class.
    assert_eq!(classify(200).unwrap().slot_size, 208);
    let p = heap.alloc(200);
    unsafe {
        for offset in 0..200 {
            p.add(offset).write(offset as u8);
        }
    }

    // Still small, but a different class: the data must follow.
    let q = unsafe { heap.resize(p, 240) };
    assert!(!q.is_null());
    unsafe {
        for offset in 0..200 {
            assert_eq!(*q.add(offset), offset as u8);
        }
    }

    // Into the medium regime.
    let r = unsafe { heap.resize(q, 1700) };
    assert!(!r.is_null());
    unsafe {
        for offset in 0..200 {
            assert_eq!(*r.add(offset), offset as u8);
        }
        heap.free(r);
    }
    assert_eq!(heap.stats().total_allocations, 0);
}

#[test]
fn test_freed_slot_is_reused() {
    let mut heap = Heap::new();

    let first = heap.alloc(64);
    let second = heap.alloc(64);
    unsafe { heap.free(first) };

    // The lowest free slot wins, so the very next allocation of the
    // class lands on the slot just released.
    let third = heap.alloc(64);
    assert_eq!(third, first);

    unsafe {
        heap.free(second);
        heap.free(third);
    }
}

#[test]
fn test_zero_and_oversize_requests_are_rejected() {
    let mut heap = Heap::new();
    assert!(heap.alloc(0).is_null());
    assert!(heap.alloc(MAX_SIZE + 1).is_null());
    assert_eq!(heap.stats().total_allocations, 0);
}

#[test]
fn test_oom_returns_null_without_state_change() {
    let mut heap = Heap::new();
    // MAX_SIZE itself passes validation but no OS will map 2^63 bytes.
    assert!(heap.alloc(MAX_SIZE).is_null());
    assert_eq!(heap.stats(), bucket_malloc::AllocationStats::new());
}

#[test]
fn test_large_threshold_boundary() {
    let mut heap = Heap::new();
    let threshold = 4 * sys_pages::page_size();

    let below = heap.alloc(threshold - 1);
    let at = heap.alloc(threshold);

    let stats = heap.stats();
    assert_eq!(stats.bucket_allocations, 1);
    assert_eq!(stats.large_allocations, 1);
    assert_eq!(stats.large_bytes, threshold);

    unsafe {
        heap.free(below);
        heap.free(at);
    }
}

#[test]
fn test_beyond_medium_goes_large_even_under_a_high_threshold() {
    use bucket_malloc::{HeapConfig, LargeThreshold, MAX_MEDIUM_SIZE};

    let mut heap = Heap::with_config(HeapConfig {
        large_threshold: LargeThreshold::Bytes(1 << 30),
        ..HeapConfig::new()
    });

    let ptr = heap.alloc(MAX_MEDIUM_SIZE + 1);
    assert!(!ptr.is_null());
    assert_eq!(heap.stats().large_allocations, 1);

    unsafe { heap.free(ptr) };
}
