//! End-to-end scenarios for the handle-indirected allocator.

use tagheap::{CompactingHeap, Handle};

#[test]
fn max_one_byte_allocations_then_drain() {
    // 64 KiB region: each 1-byte payload occupies an 8-byte block plus two
    // tags, and the first header sits behind the 4-byte bootstrap word.
    const CAPACITY: usize = 1 << 16;
    let mut heap = CompactingHeap::new(CAPACITY);

    let mut handles: Vec<Handle> = Vec::new();
    while let Some(handle) = heap.put(b"x") {
        handles.push(handle);
    }
    let count = handles.len();
    assert_eq!(count, (CAPACITY - 4 - 8) / 16);
    assert_eq!(heap.report().failed_requests, 1);

    for handle in handles.into_iter().rev() {
        let mut buf = [0_u8; 1];
        heap.get(&mut buf, handle);
        assert_eq!(buf, [b'x']);
    }

    let report = heap.report();
    assert_eq!(report.allocated_blocks, 0);
    assert_eq!(report.aligned_bytes_free as usize, CAPACITY);

    // the frontier is back at the base: one huge allocation fits again
    assert!(heap.alloc(CAPACITY - 16).is_some());
}

#[test]
fn compaction_keeps_the_live_run_contiguous() {
    let mut heap = CompactingHeap::new(1 << 20);
    let handles: Vec<Handle> = (0..10)
        .map(|i| heap.put(&[i as u8; 32]).unwrap())
        .collect();

    // free every other block; the survivors slide down each time
    for &handle in handles.iter().step_by(2) {
        heap.free(handle);
    }

    let mut offsets: Vec<usize> = handles
        .iter()
        .skip(1)
        .step_by(2)
        .map(|&handle| heap.resolve(handle).unwrap().offset())
        .collect();
    offsets.sort_unstable();

    // five live 32-byte blocks, packed back to back from the base
    assert_eq!(offsets.len(), 5);
    assert_eq!(offsets[0], 8);
    for pair in offsets.windows(2) {
        assert_eq!(pair[1] - pair[0], 32 + 8);
    }

    // and their payloads went with them
    for (i, &handle) in handles.iter().enumerate().skip(1).step_by(2) {
        let mut buf = [0_u8; 32];
        heap.get(&mut buf, handle);
        assert_eq!(buf, [i as u8; 32]);
    }
    assert_eq!(heap.report().allocated_blocks, 0);
}

#[test]
fn round_trip_preserves_payload_and_counters() {
    let mut heap = CompactingHeap::new(1 << 20);
    let payload: Vec<u8> = (0..=255).collect();

    let handle = heap.put(&payload).unwrap();
    let mut buf = vec![0_u8; payload.len()];
    heap.get(&mut buf, handle);
    assert_eq!(buf, payload);

    let report = heap.report();
    assert_eq!(
        report.malloc_requests,
        report.free_requests + report.failed_requests
    );
    assert_eq!(report.allocated_blocks, 0);
}

#[test]
fn exhausted_table_fails_before_touching_the_region() {
    let mut heap = CompactingHeap::with_slots(1 << 20, 3);
    let aligned_free = heap.report().aligned_bytes_free;

    let _a = heap.alloc(8).unwrap();
    let _b = heap.alloc(8).unwrap();
    let _c = heap.alloc(8).unwrap();
    assert!(heap.alloc(8).is_none());

    let report = heap.report();
    assert_eq!(report.failed_requests, 1);
    assert_eq!(report.allocated_blocks, 3);
    assert_eq!(report.aligned_bytes_free, aligned_free - 3 * 16);
}

#[test]
fn dead_handles_fail_without_side_effects() {
    let mut heap = CompactingHeap::new(1 << 20);
    let a = heap.put(b"payload").unwrap();
    let b = heap.put(b"payload").unwrap();
    heap.free(a);
    let resolved = heap.resolve(b);
    let before = heap.report();

    heap.free(a);
    let mut buf = [0xee_u8; 7];
    heap.get(&mut buf, a);
    assert_eq!(buf, [0xee; 7]);

    let after = heap.report();
    assert_eq!(after.failed_requests, before.failed_requests + 2);
    assert_eq!(after.allocated_blocks, before.allocated_blocks);
    assert_eq!(heap.resolve(b), resolved);
}

#[test]
fn stability_under_churn() {
    let mut heap = CompactingHeap::new(1 << 20);
    for i in 0..10_000_usize {
        let data = format!("String 1, the current count is {i}\n");
        let handle1 = heap.put(data.as_bytes()).unwrap();
        let handle2 = heap.put(data.as_bytes()).unwrap();
        assert_eq!(heap.resolve(handle1).unwrap().offset() % 8, 0);
        assert_eq!(heap.resolve(handle2).unwrap().offset() % 8, 0);

        let mut buf = vec![0_u8; data.len()];
        heap.get(&mut buf, handle2);
        assert_eq!(buf, data.as_bytes());
        heap.get(&mut buf, handle1);
        assert_eq!(buf, data.as_bytes());
    }

    let report = heap.report();
    assert_eq!(report.malloc_requests, 20_000);
    assert_eq!(report.free_requests, 20_000);
    assert_eq!(report.failed_requests, 0);
}
