//! regionforge - two-level region allocator for device memory
//!
//! Coarse blocks obtained from an external allocator (a GPU driver, a host
//! arena, ...) are carved into reusable, variable-sized regions by first-fit
//! placement with splitting and coalescing. The external allocator is reached
//! only through the callbacks in [`backend`].
//!
//! - [`memory::RegionAllocator`]: the regions of one block
//! - [`memory::BlockAllocator`]: picks or creates the block for a request
//! - [`memory::SharedBlockAllocator`]: the same behind a mutex

pub mod backend;
pub mod error;
pub mod logging;
pub mod memory;

pub use backend::{BlockBackend, HostMemoryBackend, RegionBackend};
pub use error::{AllocError, AllocResult, ErrorCategory};
pub use memory::{
    BlockAllocator, BlockAllocatorConfig, MemoryBlock, MemoryProperties, MemoryRegion,
    MemoryRequest, RegionAllocator, RegionHandle, SharedBlockAllocator,
};
