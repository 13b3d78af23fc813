//! End-to-end scenarios exercised against `Heap<TestBackend>`, independent
//! of the process-wide singleton so they can run in any order and in
//! parallel with each other.

use lmmalloc::{Heap, TestBackend};

fn heap() -> Heap<TestBackend> {
    Heap::new(TestBackend::default())
}

#[test]
fn basic_allocation_is_reused_after_free() {
    let h = heap();
    let a = h.malloc(40);
    assert!(!a.is_null());
    unsafe {
        std::ptr::write_bytes(a, 0x42, 40);
    }
    h.free(a);

    let b = h.malloc(40);
    assert_eq!(a, b, "a freed block of the same class should be recycled");
    h.free(b);
}

#[test]
fn aligned_allocation_honors_large_alignments() {
    let h = heap();
    for &align in &[16usize, 64, 256, 4096, 65536] {
        let p = h.memalign(align, 37);
        assert!(!p.is_null());
        assert_eq!(p as usize % align, 0, "misaligned for requested alignment {align}");
        unsafe {
            std::ptr::write_bytes(p, 0x7A, 37);
        }
        h.free(p);
    }
}

#[test]
fn calloc_delivers_zeroed_memory_even_when_recycled() {
    let h = heap();
    let p = h.calloc(10, 10);
    assert!(!p.is_null());
    unsafe {
        for i in 0..100 {
            assert_eq!(*p.add(i), 0);
        }
        std::ptr::write_bytes(p, 0xFF, 100);
    }
    h.free(p);

    let q = h.calloc(10, 10);
    unsafe {
        for i in 0..100 {
            assert_eq!(*q.add(i), 0, "byte {i} was not re-zeroed after recycling");
        }
    }
    h.free(q);
}

#[test]
fn realloc_growth_preserves_data_and_zero_fills_the_extension() {
    let h = heap();
    let p = h.calloc(1, 16);
    unsafe {
        std::ptr::write_bytes(p, 0x5A, 16);
    }

    let grown = h.realloc(p, 512);
    assert!(!grown.is_null());
    unsafe {
        for i in 0..16 {
            assert_eq!(*grown.add(i), 0x5A, "original bytes must survive growth");
        }
        for i in 16..512 {
            assert_eq!(*grown.add(i), 0, "tail of a zero-filled block's growth must stay zero");
        }
    }
    h.free(grown);
}

#[test]
fn large_requests_take_the_mapped_path_and_round_trip() {
    let h = heap();
    let threshold = {
        // Force a request comfortably above whatever the mapping threshold
        // tunable currently is.
        let small = h.malloc(8);
        h.free(small);
        h.mallopt(lmmalloc::config::M_MMAP_THRESHOLD, 16 * 1024);
        16 * 1024 + 1
    };

    let p = h.malloc(threshold);
    assert!(!p.is_null());
    assert!(h.usable_size(p) >= threshold);
    unsafe {
        std::ptr::write_bytes(p, 0x33, threshold);
    }
    h.free(p);
}

#[test]
fn concurrent_allocation_and_freeing_does_not_corrupt_state() {
    use std::sync::Arc;
    use std::thread;

    let h = Arc::new(heap());
    let threads: Vec<_> = (0..16)
        .map(|t| {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                let mut live = Vec::new();
                for i in 0..500 {
                    let size = 8 + (t * 37 + i) % 300;
                    let p = h.malloc(size);
                    assert!(!p.is_null());
                    unsafe {
                        std::ptr::write_bytes(p, (t % 256) as u8, size);
                    }
                    live.push((p, size));

                    if live.len() > 32 {
                        let (old_p, old_size) = live.remove(0);
                        unsafe {
                            for k in 0..old_size {
                                assert_eq!(*old_p.add(k), (t % 256) as u8);
                            }
                        }
                        h.free(old_p);
                    }
                }
                for (p, _) in live {
                    h.free(p);
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }
}
