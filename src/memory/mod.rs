//! Region and block allocation
//!
//! Devices punish many small allocations, so memory is requested from the
//! backend in large blocks and subdivided here:
//!
//! 1. [`BlockAllocator`] keeps a list of blocks and picks the first compatible
//!    one with enough headroom, creating a new block when none fits
//! 2. [`RegionAllocator`] carves that block into regions, splitting oversized
//!    free regions and coalescing neighbours when they are freed
//! 3. Region metadata lives in a [`MetadataPool`], so split/coalesce never
//!    touch the global allocator once warmed up

pub mod alignment;
pub mod block_allocator;
pub mod config;
pub mod pool;
pub mod region_allocator;
pub mod shared;
pub mod types;

pub use block_allocator::{AllocatorStats, BlockAllocator, BlockInfo};
pub use config::BlockAllocatorConfig;
pub use pool::{MetadataPool, PoolError, SlotId};
pub use region_allocator::{
    BlockId, BlockResource, RegionAllocator, RegionHandle, RegionInfo, Regions,
};
pub use shared::SharedBlockAllocator;
pub use types::{
    AllocationStatus, MemoryBlock, MemoryCaching, MemoryHandle, MemoryProperties, MemoryRange,
    MemoryRegion, MemoryRequest, MemoryUsage, MemoryVisibility,
};
