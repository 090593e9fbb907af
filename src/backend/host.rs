//! Host memory backend
//!
//! Blocks are zero-initialized host byte buffers; region handles are views
//! into them (like sub-buffer views into a device allocation). Useful as a
//! reference backend, for tests and for CPU fallbacks.

use std::collections::HashMap;

use super::{BlockBackend, RegionBackend};
use crate::error::{AllocError, AllocResult};
use crate::memory::{MemoryBlock, MemoryHandle, MemoryRegion};

/// Call and byte counters kept by [`HostMemoryBackend`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMemoryStats {
    pub block_allocations: usize,
    pub block_deallocations: usize,
    pub region_allocations: usize,
    pub region_deallocations: usize,
    /// Bytes held by live blocks
    pub live_block_bytes: usize,
    /// Bytes covered by live region handles
    pub live_region_bytes: usize,
    /// Highest value `live_block_bytes` has reached
    pub peak_block_bytes: usize,
}

impl HostMemoryStats {
    pub fn live_blocks(&self) -> usize {
        self.block_allocations - self.block_deallocations
    }

    pub fn live_regions(&self) -> usize {
        self.region_allocations - self.region_deallocations
    }
}

#[derive(Debug, Clone, Copy)]
struct RegionView {
    block: MemoryHandle,
    offset: usize,
    size: usize,
}

/// Backend that serves blocks from the host heap
#[derive(Debug, Default)]
pub struct HostMemoryBackend {
    blocks: HashMap<MemoryHandle, Box<[u8]>>,
    regions: HashMap<MemoryHandle, RegionView>,
    next_handle: u64,
    /// Refuse block allocations that would exceed this many live bytes
    capacity_limit: Option<usize>,
    stats: HostMemoryStats,
}

impl HostMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that behaves like a device with `bytes` of memory
    pub fn with_capacity_limit(bytes: usize) -> Self {
        Self {
            capacity_limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn stats(&self) -> &HostMemoryStats {
        &self.stats
    }

    /// Bytes of a live region, with alignment padding stripped
    pub fn region_bytes(&self, region: &MemoryRegion) -> Option<&[u8]> {
        let view = self.regions.get(&region.handle?)?;
        let block = self.blocks.get(&view.block)?;
        let start = view.offset + region.range.head_offset;
        let end = view.offset + view.size - region.range.tail_offset;
        block.get(start..end)
    }

    /// Mutable bytes of a live region, with alignment padding stripped
    pub fn region_bytes_mut(&mut self, region: &MemoryRegion) -> Option<&mut [u8]> {
        let view = *self.regions.get(&region.handle?)?;
        let block = self.blocks.get_mut(&view.block)?;
        let start = view.offset + region.range.head_offset;
        let end = view.offset + view.size - region.range.tail_offset;
        block.get_mut(start..end)
    }

    fn next_handle(&mut self) -> MemoryHandle {
        // 0 is never handed out so a zeroed handle is always bogus
        self.next_handle += 1;
        MemoryHandle::new(self.next_handle)
    }
}

impl RegionBackend for HostMemoryBackend {
    fn allocate_region(
        &mut self,
        block: &MemoryBlock,
        region: &mut MemoryRegion,
    ) -> AllocResult<()> {
        let block_handle = block.handle.ok_or_else(|| {
            AllocError::RegionAllocationFailed("parent block is not materialized".to_string())
        })?;
        let buffer_len = self
            .blocks
            .get(&block_handle)
            .map(|buffer| buffer.len())
            .ok_or_else(|| {
                AllocError::RegionAllocationFailed(format!("unknown block handle {}", block_handle))
            })?;

        let end = region.offset.checked_add(region.size);
        if end.map_or(true, |end| end > buffer_len) {
            return Err(AllocError::RegionAllocationFailed(format!(
                "region of {} bytes at offset {} exceeds block of {} bytes",
                region.size, region.offset, buffer_len
            )));
        }

        let handle = self.next_handle();
        self.regions.insert(
            handle,
            RegionView {
                block: block_handle,
                offset: region.offset,
                size: region.size,
            },
        );
        region.handle = Some(handle);

        self.stats.region_allocations += 1;
        self.stats.live_region_bytes += region.size;
        tracing::trace!(
            "HostMemoryBackend: region {} -> block {} [{}, {})",
            handle,
            block_handle,
            region.offset,
            region.offset + region.size
        );
        Ok(())
    }

    fn deallocate_region(&mut self, _block: &MemoryBlock, region: &mut MemoryRegion) {
        let Some(handle) = region.handle.take() else {
            return;
        };
        match self.regions.remove(&handle) {
            Some(view) => {
                self.stats.region_deallocations += 1;
                self.stats.live_region_bytes -= view.size;
            }
            None => tracing::warn!("HostMemoryBackend: unknown region handle {}", handle),
        }
    }
}

impl BlockBackend for HostMemoryBackend {
    fn allocate_block(&mut self, block: &mut MemoryBlock) -> AllocResult<()> {
        if let Some(limit) = self.capacity_limit {
            let total = self.stats.live_block_bytes.checked_add(block.size);
            if total.map_or(true, |total| total > limit) {
                return Err(AllocError::BlockAllocationFailed(format!(
                    "host capacity exhausted: {} live + {} requested > {}",
                    self.stats.live_block_bytes, block.size, limit
                )));
            }
        }

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(block.size).map_err(|e| {
            AllocError::BlockAllocationFailed(format!(
                "host allocation of {} bytes failed: {}",
                block.size, e
            ))
        })?;
        bytes.resize(block.size, 0u8);

        let handle = self.next_handle();
        self.blocks.insert(handle, bytes.into_boxed_slice());
        block.handle = Some(handle);

        self.stats.block_allocations += 1;
        self.stats.live_block_bytes += block.size;
        self.stats.peak_block_bytes = self.stats.peak_block_bytes.max(self.stats.live_block_bytes);
        tracing::debug!(
            "HostMemoryBackend: allocated block {} ({} bytes)",
            handle,
            block.size
        );
        Ok(())
    }

    fn deallocate_block(&mut self, block: &mut MemoryBlock) {
        let Some(handle) = block.handle.take() else {
            return;
        };
        let dangling = self.regions.values().filter(|view| view.block == handle).count();
        if dangling > 0 {
            tracing::warn!(
                "HostMemoryBackend: block {} freed with {} live region views",
                handle,
                dangling
            );
        }
        if let Some(buffer) = self.blocks.remove(&handle) {
            self.stats.block_deallocations += 1;
            self.stats.live_block_bytes -= buffer.len();
        }
        tracing::debug!("HostMemoryBackend: freed block {}", handle);
    }
}
