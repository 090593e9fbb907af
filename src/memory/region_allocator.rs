//! Region allocator: carves one block into regions
//!
//! Regions of a block form a doubly linked list ordered by offset. Nodes live
//! in a [`MetadataPool`] and link to each other by [`SlotId`], so the list can
//! be walked and validated without dangling references when nodes recycle.
//!
//! Placement scans the list in order and takes the first Available region that
//! fits the aligned footprint of a request. Oversized regions are split, and
//! reclaimed regions are merged back with Available neighbours.
//!
//! # Handles
//!
//! Region handles (the backend's `MemoryHandle`) are materialized lazily: a
//! released region keeps its handle cached so that an exact-size reserve can
//! hand it out again without another backend round-trip. The handle is only
//! freed on `reclaim`, when the region's extent changes (split/coalesce), or
//! on `destroy`.
//!
//! # Thread Safety
//!
//! Not internally synchronized. Every mutating call takes `&mut self`; wrap the
//! owning [`BlockAllocator`](super::BlockAllocator) in a lock to share it.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use super::alignment::{aligned_size, conform_alignment, is_valid_alignment};
use super::pool::{MetadataPool, SlotId};
use super::types::{AllocationStatus, MemoryBlock, MemoryRange, MemoryRegion, MemoryRequest};
use crate::backend::RegionBackend;
use crate::error::{AllocError, AllocResult};
use crate::invariant_error;

static NEXT_BLOCK_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a block and its region allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    fn next() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Opaque reference to a reserved region
///
/// Handles are generational: once the region node is recycled (coalesced into
/// a neighbour or destroyed), the handle no longer resolves and any use of it
/// is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle {
    block: BlockId,
    slot: SlotId,
}

impl RegionHandle {
    /// Block this region was carved from
    pub fn block_id(&self) -> BlockId {
        self.block
    }
}

/// A block plus the number of bytes currently reserved in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResource {
    pub memory: MemoryBlock,
    pub reserved: usize,
}

/// Region list node
#[derive(Debug)]
struct BlockRegion {
    memory: MemoryRegion,
    status: AllocationStatus,
    usage_count: u32,
    prev: Option<SlotId>,
    next: Option<SlotId>,
    block: BlockId,
}

/// Snapshot of one region, as yielded by [`RegionAllocator::regions`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub handle: RegionHandle,
    pub offset: usize,
    pub size: usize,
    pub status: AllocationStatus,
    pub usage_count: u32,
    /// A backend handle is materialized (live or cached)
    pub has_handle: bool,
    pub dedicated: bool,
}

/// Sub-allocator for the regions of a single block
#[derive(Debug)]
pub struct RegionAllocator {
    id: BlockId,
    block: BlockResource,
    regions: MetadataPool<BlockRegion>,
    head: Option<SlotId>,
}

impl RegionAllocator {
    /// Bind a region allocator to an already materialized block
    ///
    /// The block starts out as a single Available region spanning all of it.
    ///
    /// # Panics
    /// If the block has zero size or no backend handle.
    pub fn create(block: MemoryBlock) -> Self {
        Self::create_with_capacity(block, MetadataPool::<BlockRegion>::DEFAULT_CAPACITY)
    }

    /// Like [`create`](Self::create), pre-sizing the metadata pool
    pub fn create_with_capacity(block: MemoryBlock, initial_capacity: usize) -> Self {
        Self::create_with_limits(block, initial_capacity, 0)
    }

    /// Like [`create_with_capacity`](Self::create_with_capacity), capping the
    /// number of region nodes at `max_regions` (0 = unlimited)
    ///
    /// # Panics
    /// Any split that would need more than `max_regions` nodes.
    pub fn create_with_limits(
        block: MemoryBlock,
        initial_capacity: usize,
        max_regions: usize,
    ) -> Self {
        assert!(block.size > 0, "RegionAllocator: block size cannot be zero");
        assert!(
            block.handle.is_some(),
            "RegionAllocator: block must be materialized before binding"
        );

        let id = BlockId::next();
        let mut regions = if max_regions == 0 {
            MetadataPool::new(initial_capacity.max(1))
        } else {
            MetadataPool::with_limit(initial_capacity.clamp(1, max_regions), max_regions)
        };
        let whole = BlockRegion {
            memory: MemoryRegion {
                handle: None,
                offset: 0,
                size: block.size,
                range: MemoryRange::default(),
                properties: block.properties,
                dedicated: block.dedicated,
                is_owner: false,
            },
            status: AllocationStatus::Available,
            usage_count: 0,
            prev: None,
            next: None,
            block: id,
        };
        let head = match regions.reserve(whole) {
            Ok(slot) => slot,
            Err(err) => panic!("RegionAllocator {}: {}", id, err),
        };

        tracing::debug!(
            "RegionAllocator {} created over {} bytes (dedicated={})",
            id,
            block.size,
            block.dedicated
        );

        Self {
            id,
            block: BlockResource {
                memory: block,
                reserved: 0,
            },
            regions,
            head: Some(head),
        }
    }

    /// Reserve a region for `request`
    ///
    /// Materializes the region through `backend` unless a cached handle can be
    /// reused. On error the allocator is left exactly as it was.
    ///
    /// # Panics
    /// If `request.size` is zero or `request.alignment` is not a power of two.
    pub fn reserve<B: RegionBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        request: &MemoryRequest,
    ) -> AllocResult<RegionHandle> {
        assert!(request.size > 0, "RegionAllocator: region size cannot be zero");
        assert!(
            is_valid_alignment(request.alignment),
            "RegionAllocator: alignment {} is not a power of two",
            request.alignment
        );

        let available = self.available();
        if request.size > available {
            tracing::debug!(
                "RegionAllocator {}: {} bytes requested, {} available",
                self.id,
                request.size,
                available
            );
            return Err(AllocError::InsufficientCapacity {
                requested: request.size,
                available,
            });
        }

        let alignment = conform_alignment(request.alignment, self.block.memory.properties.alignment);
        let slot = self.find_block_region(request, alignment).ok_or_else(|| {
            tracing::debug!(
                "RegionAllocator {}: no compatible region for {} bytes (alignment={})",
                self.id,
                request.size,
                alignment
            );
            AllocError::NoCompatibleRegion { size: request.size }
        })?;

        let footprint = aligned_size(self.node(slot).memory.offset, request.size, alignment);
        let remainder = if self.can_split(slot, footprint) {
            Some(self.split_block_region(backend, slot, footprint))
        } else {
            None
        };

        if let Err(err) = self.alloc_block_region(backend, slot, request.size, footprint) {
            if let Some(remainder) = remainder {
                self.undo_split(slot, remainder);
            }
            tracing::warn!(
                "RegionAllocator {}: backend failed to materialize region: {}",
                self.id,
                err
            );
            return Err(err);
        }

        let node = self.node(slot);
        tracing::trace!(
            "RegionAllocator {}: reserved [{}, {}) for {} bytes (alignment={})",
            self.id,
            node.memory.offset,
            node.memory.offset + node.memory.size,
            request.size,
            alignment
        );

        Ok(RegionHandle {
            block: self.id,
            slot,
        })
    }

    /// Drop one reference; at zero the region becomes Available
    ///
    /// The backend handle stays cached for reuse.
    pub fn release(&mut self, handle: RegionHandle) {
        let slot = self.resolve(handle);
        let node = slot_mut(&mut self.regions, slot);
        node.usage_count = node.usage_count.saturating_sub(1);
        if node.usage_count > 0 {
            return;
        }
        if node.status != AllocationStatus::Available {
            self.block.reserved -= node.memory.size;
            node.status = AllocationStatus::Available;
        }
        tracing::trace!(
            "RegionAllocator {}: released region at offset {}",
            self.id,
            node.memory.offset
        );
    }

    /// Drop one reference; at zero free the handle and merge with neighbours
    ///
    /// While other owners still retain the region only the caller's
    /// reference is dropped.
    pub fn reclaim<B: RegionBackend + ?Sized>(&mut self, backend: &mut B, handle: RegionHandle) {
        let slot = self.resolve(handle);
        let node = slot_mut(&mut self.regions, slot);
        node.usage_count = node.usage_count.saturating_sub(1);
        if node.usage_count > 0 {
            tracing::trace!(
                "RegionAllocator {}: region at offset {} still retained ({} owners)",
                self.id,
                node.memory.offset,
                node.usage_count
            );
            return;
        }
        if node.status != AllocationStatus::Available {
            self.block.reserved -= node.memory.size;
            node.status = AllocationStatus::Available;
        }
        free_region_handle(backend, &self.block.memory, &mut node.memory);
        tracing::trace!(
            "RegionAllocator {}: reclaimed region at offset {}",
            self.id,
            node.memory.offset
        );

        self.coalesce_block_region(backend, slot);
    }

    /// Add a reference to a region
    pub fn retain(&mut self, handle: RegionHandle) {
        let slot = self.resolve(handle);
        self.node_mut(slot).usage_count += 1;
    }

    /// Merge every run of adjacent Available regions
    ///
    /// Returns whether anything merged.
    pub fn collect<B: RegionBackend + ?Sized>(&mut self, backend: &mut B) -> bool {
        let mut merged = false;
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            if self.is_mergeable(slot) {
                while let Some(next) = self.node(slot).next {
                    if !self.is_mergeable(next) {
                        break;
                    }
                    self.merge_block_regions(backend, slot, next);
                    merged = true;
                }
            }
            cursor = self.node(slot).next;
        }

        if merged {
            tracing::debug!(
                "RegionAllocator {}: collected down to {} regions",
                self.id,
                self.regions.len()
            );
        }
        merged
    }

    /// Release every region down to zero references, keeping handles cached
    pub fn release_all(&mut self) {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = slot_mut(&mut self.regions, slot);
            node.usage_count = 0;
            if node.status != AllocationStatus::Available {
                self.block.reserved -= node.memory.size;
                node.status = AllocationStatus::Available;
            }
            cursor = node.next;
        }
        tracing::debug!("RegionAllocator {}: released all regions", self.id);
    }

    /// Tear the allocator down, freeing every live region handle exactly once
    ///
    /// Regions still in use are freed too. Returns the block so the caller can
    /// hand it back to its own allocator.
    pub fn destroy<B: RegionBackend + ?Sized>(mut self, backend: &mut B) -> MemoryBlock {
        let mut freed = 0;
        let mut cursor = self.head.take();
        while let Some(slot) = cursor {
            let mut node = match self.regions.reclaim(slot) {
                Some(node) => node,
                None => panic!("RegionAllocator {}: dangling region link", self.id),
            };
            cursor = node.next;
            if node.memory.handle.is_some() {
                free_region_handle(backend, &self.block.memory, &mut node.memory);
                freed += 1;
            }
        }
        self.regions.clear();
        self.block.reserved = 0;

        tracing::debug!(
            "RegionAllocator {} destroyed ({} region handles freed)",
            self.id,
            freed
        );
        self.block.memory
    }

    pub fn block_id(&self) -> BlockId {
        self.id
    }

    pub fn block(&self) -> &MemoryBlock {
        &self.block.memory
    }

    pub fn resource(&self) -> &BlockResource {
        &self.block
    }

    /// Bytes held by regions that are not Available
    pub fn reserved(&self) -> usize {
        self.block.reserved
    }

    /// Unreserved bytes (possibly fragmented)
    pub fn available(&self) -> usize {
        self.block.memory.size - self.block.reserved
    }

    /// Check whether `handle` refers to a live region of this allocator
    pub fn owns(&self, handle: RegionHandle) -> bool {
        handle.block == self.id && self.regions.contains(handle.slot)
    }

    /// Caller-visible description of a live region
    pub fn region(&self, handle: RegionHandle) -> Option<&MemoryRegion> {
        self.lookup(handle).map(|node| &node.memory)
    }

    pub fn status(&self, handle: RegionHandle) -> Option<AllocationStatus> {
        self.lookup(handle).map(|node| node.status)
    }

    pub fn usage_count(&self, handle: RegionHandle) -> Option<u32> {
        self.lookup(handle).map(|node| node.usage_count)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Iterate the regions in offset order
    pub fn regions(&self) -> Regions<'_> {
        Regions {
            allocator: self,
            cursor: self.head,
        }
    }

    /// A single Available, unreferenced region spans the whole block
    pub fn is_idle(&self) -> bool {
        match self.head.map(|slot| self.node(slot)) {
            Some(node) => {
                node.next.is_none()
                    && node.status == AllocationStatus::Available
                    && node.usage_count == 0
                    && node.memory.size == self.block.memory.size
            }
            None => false,
        }
    }

    /// Fragmentation ratio of the free space (0.0 = one free region)
    pub fn fragmentation(&self) -> f32 {
        let free_sizes = self
            .regions()
            .filter(|info| info.status == AllocationStatus::Available && info.usage_count == 0)
            .map(|info| info.size);
        let (free, largest) = free_sizes.fold((0usize, 0usize), |(sum, max), size| {
            (sum + size, max.max(size))
        });
        if free == 0 {
            return 0.0;
        }
        1.0 - (largest as f32 / free as f32)
    }

    /// Walk the region list and check every structural invariant
    ///
    /// Contiguity (no gaps, no overlap, first offset 0, sizes summing to the
    /// block size), link symmetry, node ownership and reserved-byte accounting.
    pub fn validate_invariants(&self) -> AllocResult<()> {
        let block_size = self.block.memory.size;
        let mut expected_offset = 0;
        let mut expected_prev = None;
        let mut reserved = 0;
        let mut count = 0;
        let mut cursor = self.head;

        while let Some(slot) = cursor {
            let node = self
                .regions
                .get(slot)
                .ok_or_else(|| invariant_error!("{}: dangling link to slot {:?}", self.id, slot))?;

            if node.block != self.id {
                return Err(invariant_error!(
                    "{}: region at offset {} belongs to {}",
                    self.id,
                    node.memory.offset,
                    node.block
                ));
            }
            if node.prev != expected_prev {
                return Err(invariant_error!(
                    "{}: broken back link at offset {}",
                    self.id,
                    node.memory.offset
                ));
            }
            if node.memory.offset != expected_offset {
                return Err(invariant_error!(
                    "{}: region starts at {}, expected {}",
                    self.id,
                    node.memory.offset,
                    expected_offset
                ));
            }
            if node.memory.size == 0 {
                return Err(invariant_error!(
                    "{}: empty region at offset {}",
                    self.id,
                    node.memory.offset
                ));
            }
            if node.status != AllocationStatus::Available {
                if node.memory.handle.is_none() {
                    return Err(invariant_error!(
                        "{}: region at offset {} is reserved without a handle",
                        self.id,
                        node.memory.offset
                    ));
                }
                reserved += node.memory.size;
            }

            expected_offset += node.memory.size;
            expected_prev = Some(slot);
            count += 1;
            if count > self.regions.len() {
                return Err(invariant_error!("{}: cycle in region list", self.id));
            }
            cursor = node.next;
        }

        if expected_offset != block_size {
            return Err(invariant_error!(
                "{}: regions cover {} bytes of a {} byte block",
                self.id,
                expected_offset,
                block_size
            ));
        }
        if count != self.regions.len() {
            return Err(invariant_error!(
                "{}: {} regions linked, {} allocated",
                self.id,
                count,
                self.regions.len()
            ));
        }
        if reserved != self.block.reserved || reserved > block_size {
            return Err(invariant_error!(
                "{}: reserved is {}, regions account for {}",
                self.id,
                self.block.reserved,
                reserved
            ));
        }
        Ok(())
    }

    /// First Available region that can hold `request` at `alignment`
    fn find_block_region(&self, request: &MemoryRequest, alignment: usize) -> Option<SlotId> {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = self.node(slot);
            cursor = node.next;

            if node.status != AllocationStatus::Available || node.usage_count > 0 {
                continue;
            }
            if !node.memory.properties.is_compatible(&request.properties) {
                continue;
            }
            if request.size > node.memory.size {
                continue;
            }
            let footprint = aligned_size(node.memory.offset, request.size, alignment);
            if footprint > node.memory.size {
                continue;
            }
            if self.block.reserved.saturating_add(footprint) > self.block.memory.size {
                continue;
            }
            return Some(slot);
        }
        None
    }

    fn can_split(&self, slot: SlotId, footprint: usize) -> bool {
        let node = self.node(slot);
        !node.memory.dedicated && node.usage_count == 0 && node.memory.size > footprint
    }

    /// Truncate `slot` to `footprint` bytes and link an Available remainder
    fn split_block_region<B: RegionBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        slot: SlotId,
        footprint: usize,
    ) -> SlotId {
        let node = self.node(slot);
        let next = node.next;
        let remainder = BlockRegion {
            memory: MemoryRegion {
                handle: None,
                offset: node.memory.offset + footprint,
                size: node.memory.size - footprint,
                range: MemoryRange::default(),
                properties: node.memory.properties,
                dedicated: false,
                is_owner: false,
            },
            status: AllocationStatus::Available,
            usage_count: 0,
            prev: Some(slot),
            next,
            block: self.id,
        };
        let remainder_slot = match self.regions.reserve(remainder) {
            Ok(id) => id,
            Err(err) => panic!("RegionAllocator {}: {}", self.id, err),
        };

        let node = slot_mut(&mut self.regions, slot);
        // the cached handle covers the old extent
        free_region_handle(backend, &self.block.memory, &mut node.memory);
        node.memory.size = footprint;
        node.next = Some(remainder_slot);
        if let Some(next) = next {
            self.node_mut(next).prev = Some(remainder_slot);
        }

        tracing::trace!(
            "RegionAllocator {}: split region at offset {} into {} + {}",
            self.id,
            self.node(slot).memory.offset,
            footprint,
            self.node(remainder_slot).memory.size
        );
        remainder_slot
    }

    /// Fold a freshly split remainder back into its region
    fn undo_split(&mut self, slot: SlotId, remainder: SlotId) {
        let absorbed = match self.regions.reclaim(remainder) {
            Some(node) => node,
            None => panic!("RegionAllocator {}: dangling region link", self.id),
        };
        let node = self.node_mut(slot);
        node.memory.size += absorbed.memory.size;
        node.next = absorbed.next;
        if let Some(next) = absorbed.next {
            self.node_mut(next).prev = Some(slot);
        }
    }

    /// Materialize (or reuse) the region's handle and mark it reserved
    fn alloc_block_region<B: RegionBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        slot: SlotId,
        size: usize,
        footprint: usize,
    ) -> AllocResult<()> {
        let node = slot_mut(&mut self.regions, slot);
        node.memory.range = MemoryRange {
            head_offset: footprint - size,
            tail_offset: node.memory.size - footprint,
        };

        if node.memory.handle.is_none() {
            let result = backend
                .allocate_region(&self.block.memory, &mut node.memory)
                .and_then(|()| match node.memory.handle {
                    Some(_) => Ok(()),
                    None => Err(AllocError::RegionAllocationFailed(
                        "backend reported success without setting a handle".to_string(),
                    )),
                });
            if let Err(err) = result {
                node.memory.range = MemoryRange::default();
                return Err(err);
            }
            node.memory.is_owner = true;
        }

        node.status = if node.memory.dedicated {
            AllocationStatus::Dedicated
        } else {
            AllocationStatus::InUse
        };
        node.usage_count = 1;
        self.block.reserved += node.memory.size;
        Ok(())
    }

    fn is_mergeable(&self, slot: SlotId) -> bool {
        let node = self.node(slot);
        node.status == AllocationStatus::Available && node.usage_count == 0 && !node.memory.dedicated
    }

    /// Merge `slot` with Available neighbours, returning the surviving slot
    fn coalesce_block_region<B: RegionBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        slot: SlotId,
    ) -> SlotId {
        if !self.is_mergeable(slot) {
            return slot;
        }

        let mut survivor = slot;
        if let Some(prev) = self.node(slot).prev {
            if self.is_mergeable(prev) {
                self.merge_block_regions(backend, prev, slot);
                survivor = prev;
            }
        }
        if let Some(next) = self.node(survivor).next {
            if self.is_mergeable(next) {
                self.merge_block_regions(backend, survivor, next);
            }
        }
        survivor
    }

    /// Absorb `next` into its predecessor `keep`
    fn merge_block_regions<B: RegionBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        keep: SlotId,
        next: SlotId,
    ) {
        let mut absorbed = match self.regions.reclaim(next) {
            Some(node) => node,
            None => panic!("RegionAllocator {}: dangling region link", self.id),
        };
        free_region_handle(backend, &self.block.memory, &mut absorbed.memory);

        let node = slot_mut(&mut self.regions, keep);
        free_region_handle(backend, &self.block.memory, &mut node.memory);
        node.memory.size += absorbed.memory.size;
        node.next = absorbed.next;
        let offset = node.memory.offset;
        let size = node.memory.size;

        if let Some(after) = absorbed.next {
            self.node_mut(after).prev = Some(keep);
        }
        tracing::trace!(
            "RegionAllocator {}: coalesced region at offset {} to {} bytes",
            self.id,
            offset,
            size
        );
    }

    /// Resolve a caller handle, rejecting foreign and stale ones
    fn resolve(&self, handle: RegionHandle) -> SlotId {
        assert!(
            handle.block == self.id,
            "RegionAllocator {}: region handle belongs to {}",
            self.id,
            handle.block
        );
        assert!(
            self.regions.contains(handle.slot),
            "RegionAllocator {}: stale region handle",
            self.id
        );
        handle.slot
    }

    fn lookup(&self, handle: RegionHandle) -> Option<&BlockRegion> {
        if handle.block != self.id {
            return None;
        }
        self.regions.get(handle.slot)
    }

    fn node(&self, slot: SlotId) -> &BlockRegion {
        match self.regions.get(slot) {
            Some(node) => node,
            None => panic!("RegionAllocator {}: dangling region link", self.id),
        }
    }

    fn node_mut(&mut self, slot: SlotId) -> &mut BlockRegion {
        slot_mut(&mut self.regions, slot)
    }
}

fn slot_mut(regions: &mut MetadataPool<BlockRegion>, slot: SlotId) -> &mut BlockRegion {
    match regions.get_mut(slot) {
        Some(node) => node,
        None => panic!("RegionAllocator: dangling region link {:?}", slot),
    }
}

fn free_region_handle<B: RegionBackend + ?Sized>(
    backend: &mut B,
    block: &MemoryBlock,
    region: &mut MemoryRegion,
) {
    if region.handle.is_none() {
        return;
    }
    backend.deallocate_region(block, region);
    region.handle = None;
    region.is_owner = false;
}

/// Iterator over the regions of a block in offset order
pub struct Regions<'a> {
    allocator: &'a RegionAllocator,
    cursor: Option<SlotId>,
}

impl Iterator for Regions<'_> {
    type Item = RegionInfo;

    fn next(&mut self) -> Option<RegionInfo> {
        let slot = self.cursor?;
        let node = self.allocator.node(slot);
        self.cursor = node.next;
        Some(RegionInfo {
            handle: RegionHandle {
                block: self.allocator.id,
                slot,
            },
            offset: node.memory.offset,
            size: node.memory.size,
            status: node.status,
            usage_count: node.usage_count,
            has_handle: node.memory.handle.is_some(),
            dedicated: node.memory.dedicated,
        })
    }
}
