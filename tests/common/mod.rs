//! Common test utilities for allocator tests
//!
//! - `CountingBackend`: host backend that records callbacks and panics on
//!   double materialization or double free
//! - Allocator constructors with small, test-friendly block sizes
//! - `assert_layout_invariants`: contiguity and accounting checks that do not
//!   rely on the allocator's own validation
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::{counting_allocator, assert_layout_invariants};
//!
//! #[test]
//! fn my_test() {
//!     let mut allocator = counting_allocator(1024);
//!     let handle = allocator.reserve(&MemoryRequest::new(4, 0)).unwrap();
//!     assert_layout_invariants(&allocator);
//! }
//! ```

#![allow(dead_code)]

mod fixtures;
mod tempfile_helpers;

pub use fixtures::{BackendEvent, CountingBackend};
pub use serial_test::serial;
pub use tempfile_helpers::*;

use once_cell::sync::Lazy;
use regionforge::backend::{BlockBackend, HostMemoryBackend};
use regionforge::memory::{
    AllocationStatus, BlockAllocator, BlockAllocatorConfig, RegionAllocator,
};

/// Install a subscriber once for the whole test binary
///
/// Set `REGIONFORGE_LOG_LEVEL=trace` to see allocator events while debugging.
pub static TEST_LOGGING: Lazy<()> = Lazy::new(|| {
    let _ = regionforge::logging::init_logging_from_env();
});

/// Block allocator over a `CountingBackend`
pub fn counting_allocator(minimum_block_size: usize) -> BlockAllocator<CountingBackend> {
    counting_allocator_with(BlockAllocatorConfig::new().with_minimum_block_size(minimum_block_size))
}

pub fn counting_allocator_with(config: BlockAllocatorConfig) -> BlockAllocator<CountingBackend> {
    Lazy::force(&TEST_LOGGING);
    BlockAllocator::create(config, CountingBackend::new()).expect("valid test configuration")
}

/// Block allocator over a plain `HostMemoryBackend`
pub fn host_allocator(minimum_block_size: usize) -> BlockAllocator<HostMemoryBackend> {
    Lazy::force(&TEST_LOGGING);
    let config = BlockAllocatorConfig::new().with_minimum_block_size(minimum_block_size);
    BlockAllocator::create(config, HostMemoryBackend::new()).expect("valid test configuration")
}

/// Materialize a block of `size` bytes and bind a region allocator to it
pub fn region_allocator<B: BlockBackend>(backend: &mut B, size: usize) -> RegionAllocator {
    Lazy::force(&TEST_LOGGING);
    let mut block = regionforge::MemoryBlock::new(size, Default::default());
    backend.allocate_block(&mut block).expect("test block allocation");
    RegionAllocator::create(block)
}

/// Check contiguity and accounting of one block from its public view
pub fn assert_region_invariants(allocator: &RegionAllocator) {
    let regions: Vec<_> = allocator.regions().collect();
    assert!(!regions.is_empty(), "{} has no regions", allocator.block_id());
    assert_eq!(regions[0].offset, 0, "first region must start at 0");

    for pair in regions.windows(2) {
        assert_eq!(
            pair[0].offset + pair[0].size,
            pair[1].offset,
            "gap or overlap between regions at {} and {}",
            pair[0].offset,
            pair[1].offset
        );
    }

    let total: usize = regions.iter().map(|r| r.size).sum();
    assert_eq!(total, allocator.block().size, "regions must cover the block");

    let reserved: usize = regions
        .iter()
        .filter(|r| r.status != AllocationStatus::Available)
        .map(|r| r.size)
        .sum();
    assert_eq!(reserved, allocator.reserved(), "reserved bytes out of sync");

    allocator
        .validate_invariants()
        .expect("allocator self-validation");
}

/// [`assert_region_invariants`] for every block of a block allocator
pub fn assert_layout_invariants<B: BlockBackend>(allocator: &BlockAllocator<B>) {
    for info in allocator.blocks() {
        let region_allocator = allocator
            .region_allocator(info.id)
            .expect("listed block must resolve");
        assert_region_invariants(region_allocator);
    }
    allocator
        .validate_invariants()
        .expect("allocator self-validation");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_allocator_starts_empty() {
        let allocator = counting_allocator(1024);
        assert_eq!(allocator.block_count(), 0);
        assert!(allocator.backend().events.is_empty());
        assert_layout_invariants(&allocator);
    }
}
