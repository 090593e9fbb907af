//! Backend test doubles
//!
//! `CountingBackend` wraps the host backend, records every callback and
//! enforces the handle contract: a region is never materialized twice and
//! every handle is freed exactly once.

use regionforge::backend::{BlockBackend, HostMemoryBackend, RegionBackend};
use regionforge::memory::{MemoryBlock, MemoryHandle, MemoryRegion};
use regionforge::{AllocError, AllocResult};
use std::collections::HashSet;

/// One backend callback, as seen by [`CountingBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    AllocateBlock { size: usize },
    DeallocateBlock { size: usize },
    AllocateRegion { offset: usize, size: usize },
    DeallocateRegion { offset: usize, size: usize },
}

#[derive(Debug, Default)]
pub struct CountingBackend {
    pub host: HostMemoryBackend,
    pub events: Vec<BackendEvent>,
    /// Refuse every block allocation while set
    pub fail_block_allocations: bool,
    /// Refuse every region allocation while set
    pub fail_region_allocations: bool,
    live_blocks: HashSet<MemoryHandle>,
    live_regions: HashSet<MemoryHandle>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_allocations(&self) -> usize {
        self.count(|e| matches!(e, BackendEvent::AllocateBlock { .. }))
    }

    pub fn block_deallocations(&self) -> usize {
        self.count(|e| matches!(e, BackendEvent::DeallocateBlock { .. }))
    }

    pub fn region_allocations(&self) -> usize {
        self.count(|e| matches!(e, BackendEvent::AllocateRegion { .. }))
    }

    pub fn region_deallocations(&self) -> usize {
        self.count(|e| matches!(e, BackendEvent::DeallocateRegion { .. }))
    }

    pub fn live_block_count(&self) -> usize {
        self.live_blocks.len()
    }

    pub fn live_region_count(&self) -> usize {
        self.live_regions.len()
    }

    /// Forget recorded events, keeping live-handle tracking
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    fn count(&self, pred: impl Fn(&BackendEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl RegionBackend for CountingBackend {
    fn allocate_region(&mut self, block: &MemoryBlock, region: &mut MemoryRegion) -> AllocResult<()> {
        assert!(
            region.handle.is_none(),
            "region at offset {} materialized twice",
            region.offset
        );
        if self.fail_region_allocations {
            return Err(AllocError::RegionAllocationFailed("injected failure".to_string()));
        }
        self.host.allocate_region(block, region)?;
        if let Some(handle) = region.handle {
            self.live_regions.insert(handle);
        }
        self.events.push(BackendEvent::AllocateRegion {
            offset: region.offset,
            size: region.size,
        });
        Ok(())
    }

    fn deallocate_region(&mut self, block: &MemoryBlock, region: &mut MemoryRegion) {
        let handle = match region.handle {
            Some(handle) => handle,
            None => panic!("region at offset {} freed without a handle", region.offset),
        };
        assert!(
            self.live_regions.remove(&handle),
            "region handle {} freed twice",
            handle
        );
        self.events.push(BackendEvent::DeallocateRegion {
            offset: region.offset,
            size: region.size,
        });
        self.host.deallocate_region(block, region);
    }
}

impl BlockBackend for CountingBackend {
    fn allocate_block(&mut self, block: &mut MemoryBlock) -> AllocResult<()> {
        if self.fail_block_allocations {
            return Err(AllocError::BlockAllocationFailed("injected failure".to_string()));
        }
        self.host.allocate_block(block)?;
        if let Some(handle) = block.handle {
            self.live_blocks.insert(handle);
        }
        self.events.push(BackendEvent::AllocateBlock { size: block.size });
        Ok(())
    }

    fn deallocate_block(&mut self, block: &mut MemoryBlock) {
        let handle = match block.handle {
            Some(handle) => handle,
            None => panic!("block freed without a handle"),
        };
        assert!(
            self.live_blocks.remove(&handle),
            "block handle {} freed twice",
            handle
        );
        self.events.push(BackendEvent::DeallocateBlock { size: block.size });
        self.host.deallocate_block(block);
    }
}
