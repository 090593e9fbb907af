//! Block allocator: picks or creates the block that serves a request
//!
//! Owns a set of blocks, each bound to its own [`RegionAllocator`], plus the
//! backend that materializes blocks and regions. Requests go to the first
//! compatible block with enough headroom, in creation order. When none can
//! serve the request a new block of at least `minimum_block_size` bytes is
//! obtained from the backend.
//!
//! Idle blocks are only returned to the backend by [`BlockAllocator::collect`];
//! releasing or reclaiming regions never tears a block down on its own.

use super::alignment::{conform_size, is_valid_alignment};
use super::config::BlockAllocatorConfig;
use super::region_allocator::{BlockId, RegionAllocator, RegionHandle};
use super::types::{AllocationStatus, MemoryBlock, MemoryProperties, MemoryRegion, MemoryRequest};
use crate::backend::BlockBackend;
use crate::error::{AllocError, AllocResult, ErrorCategory};
use crate::invariant_error;

/// Counters kept across the lifetime of a [`BlockAllocator`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Successful reserves
    pub reserve_count: usize,
    /// Reserves that returned an error
    pub failed_reserve_count: usize,
    pub release_count: usize,
    pub reclaim_count: usize,
    pub retain_count: usize,
    pub blocks_created: usize,
    pub blocks_destroyed: usize,
    /// Highest total of reserved bytes across all blocks
    pub peak_reserved: usize,
    /// Highest total of live block bytes
    pub peak_block_bytes: usize,
}

/// Snapshot of one block, as yielded by [`BlockAllocator::blocks`]
#[derive(Debug, Clone, PartialEq)]
pub struct BlockInfo {
    pub id: BlockId,
    pub size: usize,
    pub reserved: usize,
    pub region_count: usize,
    pub properties: MemoryProperties,
    pub dedicated: bool,
    pub fragmentation: f32,
}

/// Two-level allocator: blocks from the backend, regions within blocks
///
/// # Thread Safety
///
/// Not internally synchronized. Use
/// [`SharedBlockAllocator`](super::SharedBlockAllocator) to share one
/// between threads.
///
/// # Example
///
/// ```rust
/// use regionforge::backend::HostMemoryBackend;
/// use regionforge::memory::{BlockAllocator, BlockAllocatorConfig, MemoryRequest};
///
/// let config = BlockAllocatorConfig::new().with_minimum_block_size(4096);
/// let mut allocator = BlockAllocator::create(config, HostMemoryBackend::new())?;
///
/// let handle = allocator.reserve(&MemoryRequest::new(256, 64))?;
/// assert_eq!(allocator.total_reserved(), 256);
///
/// allocator.reclaim(handle);
/// allocator.collect();
/// let backend = allocator.destroy();
/// assert_eq!(backend.stats().live_blocks(), 0);
/// # Ok::<(), regionforge::AllocError>(())
/// ```
#[derive(Debug)]
pub struct BlockAllocator<B: BlockBackend> {
    config: BlockAllocatorConfig,
    backend: B,
    blocks: Vec<RegionAllocator>,
    stats: AllocatorStats,
}

impl<B: BlockBackend> BlockAllocator<B> {
    /// Create an allocator that draws blocks from `backend`
    ///
    /// # Errors
    /// - `InvalidConfiguration` if `config` does not validate
    pub fn create(config: BlockAllocatorConfig, backend: B) -> AllocResult<Self> {
        config.validate()?;

        tracing::info!(
            "BlockAllocator created: minimum_block_size={} maximum_block_size={} maximum_block_count={} maximum_pool_size={}",
            config.minimum_block_size,
            config.maximum_block_size,
            config.maximum_block_count,
            config.maximum_pool_size
        );

        Ok(Self {
            blocks: Vec::with_capacity(config.initial_capacity),
            config,
            backend,
            stats: AllocatorStats::default(),
        })
    }

    /// Reserve a region for `request`
    ///
    /// # Errors
    /// - `BlockTooLarge`, `BlockLimitExceeded`, `PoolSizeExceeded` when a new
    ///   block is needed but the configuration forbids it
    /// - `BlockAllocationFailed` / `RegionAllocationFailed` when the backend
    ///   refuses an allocation
    ///
    /// The allocator is unchanged on error.
    ///
    /// # Panics
    /// If `request.size` is zero or `request.alignment` is not a power of two.
    pub fn reserve(&mut self, request: &MemoryRequest) -> AllocResult<RegionHandle> {
        assert!(request.size > 0, "BlockAllocator: region size cannot be zero");
        assert!(
            is_valid_alignment(request.alignment),
            "BlockAllocator: alignment {} is not a power of two",
            request.alignment
        );

        let result = match self.reserve_in_existing_block(request) {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) => self.reserve_in_new_block(request),
            Err(err) => Err(err),
        };

        match &result {
            Ok(_) => {
                self.stats.reserve_count += 1;
                self.stats.peak_reserved = self.stats.peak_reserved.max(self.total_reserved());
            }
            Err(err) => {
                self.stats.failed_reserve_count += 1;
                tracing::debug!(
                    "BlockAllocator: reserve of {} bytes failed: {}",
                    request.size,
                    err
                );
            }
        }
        result
    }

    /// Drop one reference to a region, keeping its handle cached
    ///
    /// # Panics
    /// If the handle's block is not owned by this allocator, or the handle is stale.
    pub fn release(&mut self, handle: RegionHandle) {
        let index = self.position(handle.block_id());
        self.blocks[index].release(handle);
        self.stats.release_count += 1;
    }

    /// Drop one reference to a region, freeing it once unreferenced
    ///
    /// # Panics
    /// If the handle's block is not owned by this allocator, or the handle is stale.
    pub fn reclaim(&mut self, handle: RegionHandle) {
        let index = self.position(handle.block_id());
        self.blocks[index].reclaim(&mut self.backend, handle);
        self.stats.reclaim_count += 1;
    }

    /// Add a reference to a region
    ///
    /// # Panics
    /// If the handle's block is not owned by this allocator, or the handle is stale.
    pub fn retain(&mut self, handle: RegionHandle) {
        let index = self.position(handle.block_id());
        self.blocks[index].retain(handle);
        self.stats.retain_count += 1;
    }

    /// Coalesce every block and return idle blocks to the backend
    ///
    /// Returns whether anything changed.
    pub fn collect(&mut self) -> bool {
        let mut changed = false;
        for allocator in self.blocks.iter_mut() {
            changed |= allocator.collect(&mut self.backend);
        }

        let mut index = 0;
        while index < self.blocks.len() {
            if self.blocks[index].is_idle() {
                let allocator = self.blocks.remove(index);
                self.destroy_block(allocator);
                changed = true;
            } else {
                index += 1;
            }
        }

        if changed {
            tracing::debug!(
                "BlockAllocator: collected, {} blocks ({} bytes) remain",
                self.blocks.len(),
                self.total_block_size()
            );
        }
        changed
    }

    /// Release every region of every block, keeping handles cached
    pub fn release_all(&mut self) {
        for allocator in self.blocks.iter_mut() {
            allocator.release_all();
        }
    }

    /// Tear everything down and hand the backend back
    ///
    /// Every region handle and block handle still alive is deallocated exactly
    /// once, including regions that were never reclaimed.
    pub fn destroy(mut self) -> B {
        let blocks = std::mem::take(&mut self.blocks);
        let count = blocks.len();
        for allocator in blocks {
            self.destroy_block(allocator);
        }
        tracing::info!("BlockAllocator destroyed ({} blocks freed)", count);
        self.backend
    }

    pub fn config(&self) -> &BlockAllocatorConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stats(&self) -> &AllocatorStats {
        &self.stats
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes across all live blocks
    pub fn total_block_size(&self) -> usize {
        self.blocks.iter().map(|a| a.block().size).sum()
    }

    /// Bytes reserved across all live blocks
    pub fn total_reserved(&self) -> usize {
        self.blocks.iter().map(|a| a.reserved()).sum()
    }

    /// Check whether `handle` refers to a live region of this allocator
    pub fn owns(&self, handle: RegionHandle) -> bool {
        self.region_allocator(handle.block_id())
            .map(|allocator| allocator.owns(handle))
            .unwrap_or(false)
    }

    /// Caller-visible description of a live region
    pub fn region(&self, handle: RegionHandle) -> Option<&MemoryRegion> {
        self.region_allocator(handle.block_id())?.region(handle)
    }

    pub fn status(&self, handle: RegionHandle) -> Option<AllocationStatus> {
        self.region_allocator(handle.block_id())?.status(handle)
    }

    pub fn usage_count(&self, handle: RegionHandle) -> Option<u32> {
        self.region_allocator(handle.block_id())?.usage_count(handle)
    }

    /// Region allocator of a live block
    pub fn region_allocator(&self, id: BlockId) -> Option<&RegionAllocator> {
        self.blocks.iter().find(|allocator| allocator.block_id() == id)
    }

    /// Iterate the live blocks in creation order
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.blocks.iter().map(|allocator| {
            let resource = allocator.resource();
            BlockInfo {
                id: allocator.block_id(),
                size: resource.memory.size,
                reserved: resource.reserved,
                region_count: allocator.region_count(),
                properties: resource.memory.properties,
                dedicated: resource.memory.dedicated,
                fragmentation: allocator.fragmentation(),
            }
        })
    }

    /// Validate every block plus the configured limits
    pub fn validate_invariants(&self) -> AllocResult<()> {
        for allocator in &self.blocks {
            allocator.validate_invariants()?;
            if allocator.block().handle.is_none() {
                return Err(invariant_error!(
                    "{} has no backend handle",
                    allocator.block_id()
                ));
            }
        }
        if self.config.maximum_block_count != 0 && self.blocks.len() > self.config.maximum_block_count {
            return Err(invariant_error!(
                "{} blocks live, limit {}",
                self.blocks.len(),
                self.config.maximum_block_count
            ));
        }
        let total = self.total_block_size();
        if self.config.maximum_pool_size != 0 && total > self.config.maximum_pool_size {
            return Err(invariant_error!(
                "{} block bytes live, limit {}",
                total,
                self.config.maximum_pool_size
            ));
        }
        Ok(())
    }

    /// Try each compatible shared block in creation order
    ///
    /// `Ok(None)` means no existing block could take the request.
    fn reserve_in_existing_block(
        &mut self,
        request: &MemoryRequest,
    ) -> AllocResult<Option<RegionHandle>> {
        if request.dedicated {
            return Ok(None);
        }

        for allocator in self.blocks.iter_mut() {
            let block = allocator.block();
            if block.dedicated
                || !block.properties.is_compatible(&request.properties)
                || allocator.available() < request.size
            {
                continue;
            }
            match allocator.reserve(&mut self.backend, request) {
                Ok(handle) => return Ok(Some(handle)),
                Err(err) if err.category() == ErrorCategory::Exhausted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn reserve_in_new_block(&mut self, request: &MemoryRequest) -> AllocResult<RegionHandle> {
        let size = self.new_block_size(request)?;
        self.check_block_limits(size)?;

        let mut block = MemoryBlock {
            handle: None,
            size,
            properties: request.properties,
            dedicated: request.dedicated,
        };
        if let Err(err) = self.backend.allocate_block(&mut block) {
            tracing::warn!("BlockAllocator: backend failed to allocate {} byte block: {}", size, err);
            return Err(err);
        }
        if block.handle.is_none() {
            tracing::warn!("BlockAllocator: backend returned a {} byte block without a handle", size);
            return Err(AllocError::BlockAllocationFailed(
                "backend reported success without setting a handle".to_string(),
            ));
        }

        let mut allocator = RegionAllocator::create_with_limits(
            block,
            self.config.initial_capacity,
            self.config.maximum_regions_per_block,
        );
        match allocator.reserve(&mut self.backend, request) {
            Ok(handle) => {
                tracing::debug!(
                    "BlockAllocator: created {} ({} bytes, dedicated={})",
                    allocator.block_id(),
                    size,
                    request.dedicated
                );
                self.blocks.push(allocator);
                self.stats.blocks_created += 1;
                self.stats.peak_block_bytes = self.stats.peak_block_bytes.max(self.total_block_size());
                Ok(handle)
            }
            Err(err) => {
                let mut block = allocator.destroy(&mut self.backend);
                self.backend.deallocate_block(&mut block);
                Err(err)
            }
        }
    }

    /// Size of the block that would be created for `request`
    fn new_block_size(&self, request: &MemoryRequest) -> AllocResult<usize> {
        // a fresh block places its first region at offset 0, so the
        // footprint is just the request size
        let footprint = request.size;
        let max = self.config.maximum_block_size;

        if max != 0 && footprint > max {
            tracing::warn!(
                "BlockAllocator: request of {} bytes exceeds maximum block size {}",
                footprint,
                max
            );
            return Err(AllocError::BlockTooLarge {
                requested: footprint,
                max,
            });
        }
        if request.dedicated {
            return Ok(footprint);
        }

        let size = conform_size(
            footprint.max(self.config.minimum_block_size),
            self.config.nearest_multiple,
        )
        .ok_or_else(|| {
            tracing::warn!(
                "BlockAllocator: request of {} bytes cannot be rounded to a multiple of {}",
                footprint,
                self.config.nearest_multiple
            );
            AllocError::BlockTooLarge {
                requested: footprint,
                max: if max == 0 { usize::MAX } else { max },
            }
        })?;
        if max != 0 {
            return Ok(size.min(max));
        }
        Ok(size)
    }

    fn check_block_limits(&self, size: usize) -> AllocResult<()> {
        let max_count = self.config.maximum_block_count;
        if max_count != 0 && self.blocks.len() >= max_count {
            tracing::warn!("BlockAllocator: block count limit {} reached", max_count);
            return Err(AllocError::BlockLimitExceeded { max: max_count });
        }

        let limit = self.config.maximum_pool_size;
        let live = self.total_block_size();
        let exceeds = live.checked_add(size).map_or(true, |total| total > limit);
        if limit != 0 && exceeds {
            tracing::warn!(
                "BlockAllocator: {} byte block would exceed pool limit {} ({} in use)",
                size,
                limit,
                live
            );
            return Err(AllocError::PoolSizeExceeded {
                requested: size,
                limit,
            });
        }
        Ok(())
    }

    fn destroy_block(&mut self, allocator: RegionAllocator) {
        let id = allocator.block_id();
        let mut block = allocator.destroy(&mut self.backend);
        let size = block.size;
        self.backend.deallocate_block(&mut block);
        block.handle = None;
        self.stats.blocks_destroyed += 1;
        tracing::debug!("BlockAllocator: destroyed {} ({} bytes)", id, size);
    }

    fn position(&self, id: BlockId) -> usize {
        match self.blocks.iter().position(|allocator| allocator.block_id() == id) {
            Some(index) => index,
            None => panic!("BlockAllocator: unknown {}", id),
        }
    }
}
