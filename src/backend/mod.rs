//! Backend seam: the callbacks that perform real allocations
//!
//! The allocators in [`crate::memory`] only manage address space. Whenever a
//! block or region has to be materialized (or torn down) they call into a
//! backend implementing the traits below. A GPU driver binding, a host arena
//! or a test double all plug in here.
//!
//! # Contract
//!
//! - `allocate_*` must set the `handle` of the block/region it receives and
//!   return `Ok(())`, or leave it untouched and return an error.
//! - `deallocate_*` must release the resource behind the handle. The allocator
//!   clears the handle afterwards.
//! - Each is called exactly once per materialization/teardown. A region is
//!   never deallocated while another owner still retains it, except during
//!   whole-allocator destruction.
//!
//! The backend value doubles as the caller context: it is threaded through
//! every call that may reach a callback and is never interpreted by the
//! allocators.

pub mod host;

pub use host::{HostMemoryBackend, HostMemoryStats};

use crate::error::AllocResult;
use crate::memory::{MemoryBlock, MemoryRegion};

/// Region-level callbacks
pub trait RegionBackend {
    /// Materialize `region` inside `block`
    fn allocate_region(&mut self, block: &MemoryBlock, region: &mut MemoryRegion)
        -> AllocResult<()>;

    /// Release the handle held by `region`
    fn deallocate_region(&mut self, block: &MemoryBlock, region: &mut MemoryRegion);
}

/// Block-level callbacks, on top of the region ones
pub trait BlockBackend: RegionBackend {
    /// Obtain the coarse allocation described by `block`
    fn allocate_block(&mut self, block: &mut MemoryBlock) -> AllocResult<()>;

    /// Return the coarse allocation held by `block`
    fn deallocate_block(&mut self, block: &mut MemoryBlock);
}

impl<B: RegionBackend + ?Sized> RegionBackend for &mut B {
    fn allocate_region(
        &mut self,
        block: &MemoryBlock,
        region: &mut MemoryRegion,
    ) -> AllocResult<()> {
        (**self).allocate_region(block, region)
    }

    fn deallocate_region(&mut self, block: &MemoryBlock, region: &mut MemoryRegion) {
        (**self).deallocate_region(block, region)
    }
}

impl<B: BlockBackend + ?Sized> BlockBackend for &mut B {
    fn allocate_block(&mut self, block: &mut MemoryBlock) -> AllocResult<()> {
        (**self).allocate_block(block)
    }

    fn deallocate_block(&mut self, block: &mut MemoryBlock) {
        (**self).deallocate_block(block)
    }
}

impl<B: RegionBackend + ?Sized> RegionBackend for Box<B> {
    fn allocate_region(
        &mut self,
        block: &MemoryBlock,
        region: &mut MemoryRegion,
    ) -> AllocResult<()> {
        (**self).allocate_region(block, region)
    }

    fn deallocate_region(&mut self, block: &MemoryBlock, region: &mut MemoryRegion) {
        (**self).deallocate_region(block, region)
    }
}

impl<B: BlockBackend + ?Sized> BlockBackend for Box<B> {
    fn allocate_block(&mut self, block: &mut MemoryBlock) -> AllocResult<()> {
        (**self).allocate_block(block)
    }

    fn deallocate_block(&mut self, block: &mut MemoryBlock) {
        (**self).deallocate_block(block)
    }
}
