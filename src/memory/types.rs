//! Core types shared by the region and block allocators
//!
//! These are plain value types: memory properties and requests coming in from
//! callers, and the region/block descriptions handed to backends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a memory range is used by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryUsage {
    /// Wildcard: compatible with any usage
    #[default]
    Default,
    StaticStorage,
    DynamicStorage,
    UniformStorage,
    TransferSrc,
    TransferDst,
    TransferSrcDst,
}

/// Cache behaviour requested for a memory range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryCaching {
    /// Wildcard: compatible with any caching mode
    #[default]
    Default,
    Cached,
    Uncached,
    CachedCoherent,
    UncachedCoherent,
}

/// Which side (host/device) can see a memory range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryVisibility {
    /// Wildcard: compatible with any visibility
    #[default]
    Default,
    HostOnly,
    DeviceOnly,
    DeviceToHost,
    HostToDevice,
}

/// Opaque compatibility tags plus the minimum alignment of a memory range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MemoryProperties {
    pub usage: MemoryUsage,
    pub caching: MemoryCaching,
    pub visibility: MemoryVisibility,
    /// Required minimum alignment in bytes (0 means unconstrained)
    pub alignment: usize,
}

impl MemoryProperties {
    pub fn new(usage: MemoryUsage, caching: MemoryCaching, visibility: MemoryVisibility) -> Self {
        Self {
            usage,
            caching,
            visibility,
            alignment: 0,
        }
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Check whether two property sets may share memory
    ///
    /// For each of usage, caching and visibility either side is `Default` or
    /// both sides match exactly. Alignment does not take part.
    pub fn is_compatible(&self, other: &MemoryProperties) -> bool {
        fn tag_matches<T: PartialEq + Default>(a: &T, b: &T) -> bool {
            *a == T::default() || *b == T::default() || a == b
        }

        tag_matches(&self.usage, &other.usage)
            && tag_matches(&self.caching, &other.caching)
            && tag_matches(&self.visibility, &other.visibility)
    }
}

/// A caller's request for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryRequest {
    /// Requested size in bytes (must be > 0)
    pub size: usize,
    /// Requested alignment in bytes (power of two, 0 means 1)
    pub alignment: usize,
    pub properties: MemoryProperties,
    /// Serve this request from its own block, never shared or split
    pub dedicated: bool,
}

impl MemoryRequest {
    pub fn new(size: usize, alignment: usize) -> Self {
        Self {
            size,
            alignment,
            ..Self::default()
        }
    }

    pub fn with_properties(mut self, properties: MemoryProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn dedicated(mut self) -> Self {
        self.dedicated = true;
        self
    }
}

/// Opaque handle produced by a backend for a block or region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryHandle(u64);

impl MemoryHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Padding kept inside a region around its usable bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRange {
    /// Bytes between the region start and the aligned data start
    pub head_offset: usize,
    /// Bytes between the data end and the region end
    pub tail_offset: usize,
}

/// One addressable span inside a block, as seen by callers and backends
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryRegion {
    /// Backend handle, `None` until materialized
    pub handle: Option<MemoryHandle>,
    /// Byte offset of the region within its block
    pub offset: usize,
    /// Region size in bytes, including alignment padding
    pub size: usize,
    pub range: MemoryRange,
    pub properties: MemoryProperties,
    /// Never split or coalesced
    pub dedicated: bool,
    /// The handle was produced by this allocator's region callback
    pub is_owner: bool,
}

impl MemoryRegion {
    /// Offset of the first usable (aligned) byte within the block
    pub fn data_offset(&self) -> usize {
        self.offset + self.range.head_offset
    }

    /// Number of usable bytes after padding is removed
    pub fn data_size(&self) -> usize {
        self.size - self.range.head_offset - self.range.tail_offset
    }

    /// Byte range `[offset, offset + size)` covered by this region
    pub fn extent(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// One coarse allocation obtained from a backend
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryBlock {
    /// Backend handle, `None` until materialized
    pub handle: Option<MemoryHandle>,
    /// Total block size in bytes
    pub size: usize,
    pub properties: MemoryProperties,
    /// Block exists to serve a single dedicated request
    pub dedicated: bool,
}

impl MemoryBlock {
    pub fn new(size: usize, properties: MemoryProperties) -> Self {
        Self {
            handle: None,
            size,
            properties,
            dedicated: false,
        }
    }
}

/// Allocation status of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStatus {
    #[default]
    Available,
    InUse,
    Dedicated,
}
