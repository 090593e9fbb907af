//! Region allocator tests against a recording backend

mod common;

use common::{assert_region_invariants, region_allocator, BackendEvent, CountingBackend};
use regionforge::memory::{AllocationStatus, MemoryRequest, RegionAllocator};
use regionforge::AllocError;

fn layout(allocator: &RegionAllocator) -> Vec<(usize, usize, AllocationStatus)> {
    allocator
        .regions()
        .map(|r| (r.offset, r.size, r.status))
        .collect()
}

#[test]
fn test_over_headroom_request_has_no_side_effects() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 256);
    allocator.reserve(&mut backend, &MemoryRequest::new(200, 0)).unwrap();
    backend.clear_events();
    let before = layout(&allocator);

    let result = allocator.reserve(&mut backend, &MemoryRequest::new(57, 0));

    assert!(matches!(
        result,
        Err(AllocError::InsufficientCapacity {
            requested: 57,
            available: 56
        })
    ));
    assert!(backend.events.is_empty());
    assert_eq!(layout(&allocator), before);
    assert_eq!(allocator.reserved(), 200);
}

#[test]
fn test_padding_can_make_a_fitting_request_fail() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 128);
    allocator.reserve(&mut backend, &MemoryRequest::new(1, 0)).unwrap();

    // 127 bytes free at offset 1, but 64-byte alignment needs 63 bytes of padding
    let result = allocator.reserve(&mut backend, &MemoryRequest::new(100, 64));
    assert!(matches!(result, Err(AllocError::NoCompatibleRegion { size: 100 })));

    let fits = allocator.reserve(&mut backend, &MemoryRequest::new(64, 64)).unwrap();
    let region = allocator.region(fits).unwrap();
    assert_eq!(region.data_offset(), 64);
    assert_eq!(region.extent(), 1..128);
    assert_region_invariants(&allocator);
}

#[test]
fn test_release_both_neighbours_then_collect() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 64);
    let a = allocator.reserve(&mut backend, &MemoryRequest::new(32, 0)).unwrap();
    let b = allocator.reserve(&mut backend, &MemoryRequest::new(32, 0)).unwrap();
    allocator.release(a);
    allocator.release(b);
    assert_eq!(allocator.region_count(), 2);

    assert!(allocator.collect(&mut backend));

    assert_eq!(layout(&allocator), vec![(0, 64, AllocationStatus::Available)]);
    assert_eq!(backend.live_region_count(), 0);

    let combined = allocator.reserve(&mut backend, &MemoryRequest::new(64, 0)).unwrap();
    assert_eq!(allocator.region(combined).unwrap().extent(), 0..64);
    assert_region_invariants(&allocator);
}

#[test]
fn test_destroy_with_live_regions() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 1024);
    for size in [10, 20, 30, 40] {
        allocator.reserve(&mut backend, &MemoryRequest::new(size, 8)).unwrap();
    }
    assert_eq!(allocator.reserved(), 10 + 6 + 20 + 4 + 30 + 2 + 40);

    let block = allocator.destroy(&mut backend);

    assert_eq!(backend.region_deallocations(), 4);
    assert_eq!(backend.live_region_count(), 0);
    assert_eq!(block.size, 1024);
    assert!(block.handle.is_some());
}

#[test]
fn test_split_frees_stale_cached_handle() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 256);
    let a = allocator.reserve(&mut backend, &MemoryRequest::new(128, 0)).unwrap();
    let _b = allocator.reserve(&mut backend, &MemoryRequest::new(128, 0)).unwrap();
    allocator.release(a);
    backend.clear_events();

    // smaller request lands in a's region and splits it
    let small = allocator.reserve(&mut backend, &MemoryRequest::new(64, 0)).unwrap();

    assert_eq!(small, a);
    assert_eq!(
        backend.events,
        vec![
            BackendEvent::DeallocateRegion {
                offset: 0,
                size: 128
            },
            BackendEvent::AllocateRegion { offset: 0, size: 64 },
        ]
    );
    assert_eq!(
        layout(&allocator),
        vec![
            (0, 64, AllocationStatus::InUse),
            (64, 64, AllocationStatus::Available),
            (128, 128, AllocationStatus::InUse)
        ]
    );
    assert_region_invariants(&allocator);
}

#[test]
fn test_reclaim_merges_both_sides() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 96);
    let a = allocator.reserve(&mut backend, &MemoryRequest::new(32, 0)).unwrap();
    let b = allocator.reserve(&mut backend, &MemoryRequest::new(32, 0)).unwrap();
    let c = allocator.reserve(&mut backend, &MemoryRequest::new(32, 0)).unwrap();
    allocator.reclaim(&mut backend, a);
    allocator.reclaim(&mut backend, c);
    assert_eq!(allocator.region_count(), 3);

    allocator.reclaim(&mut backend, b);

    assert!(allocator.is_idle());
    assert_eq!(allocator.region_count(), 1);
    assert_eq!(backend.region_allocations(), backend.region_deallocations());
    assert_region_invariants(&allocator);
}

#[test]
fn test_retained_region_is_not_handed_out_again() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 64);
    let a = allocator.reserve(&mut backend, &MemoryRequest::new(64, 0)).unwrap();
    allocator.retain(a);
    allocator.release(a);

    let result = allocator.reserve(&mut backend, &MemoryRequest::new(64, 0));

    assert!(result.is_err());
    assert_eq!(allocator.usage_count(a), Some(1));
    assert_eq!(allocator.status(a), Some(AllocationStatus::InUse));
}

#[test]
fn test_fragmentation_reflects_free_layout() {
    let mut backend = CountingBackend::new();
    let mut allocator = region_allocator(&mut backend, 400);
    assert_eq!(allocator.fragmentation(), 0.0);

    let handles: Vec<_> = (0..4)
        .map(|_| allocator.reserve(&mut backend, &MemoryRequest::new(100, 0)).unwrap())
        .collect();
    assert_eq!(allocator.fragmentation(), 0.0);

    allocator.reclaim(&mut backend, handles[0]);
    allocator.reclaim(&mut backend, handles[2]);
    assert!((allocator.fragmentation() - 0.5).abs() < f32::EPSILON);

    allocator.reclaim(&mut backend, handles[1]);
    assert_eq!(allocator.fragmentation(), 0.0);
}

#[test]
fn test_queries_ignore_foreign_handles() {
    let mut backend = CountingBackend::new();
    let mut first = region_allocator(&mut backend, 64);
    let second = region_allocator(&mut backend, 64);
    let handle = first.reserve(&mut backend, &MemoryRequest::new(8, 0)).unwrap();

    assert!(first.owns(handle));
    assert!(!second.owns(handle));
    assert_eq!(second.region(handle), None);
    assert_eq!(second.status(handle), None);
    assert_eq!(handle.block_id(), first.block_id());
}
