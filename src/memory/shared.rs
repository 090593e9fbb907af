//! Lock layer for sharing a block allocator between threads
//!
//! The allocators themselves are not synchronized. This wrapper holds one
//! mutex around the whole [`BlockAllocator`] for the duration of every call,
//! which is the caller-side discipline the allocators expect.

use std::sync::Mutex;

use super::block_allocator::{AllocatorStats, BlockAllocator};
use super::config::BlockAllocatorConfig;
use super::region_allocator::RegionHandle;
use super::types::MemoryRequest;
use crate::backend::BlockBackend;
use crate::error::AllocResult;

/// A [`BlockAllocator`] behind a mutex
///
/// `Send + Sync` whenever the backend is `Send`; share it with `Arc`.
/// A panic while the lock is held poisons it and every later call returns
/// `AllocError::LockPoisoned`.
#[derive(Debug)]
pub struct SharedBlockAllocator<B: BlockBackend> {
    inner: Mutex<BlockAllocator<B>>,
}

impl<B: BlockBackend> SharedBlockAllocator<B> {
    pub fn create(config: BlockAllocatorConfig, backend: B) -> AllocResult<Self> {
        Ok(Self::from_allocator(BlockAllocator::create(config, backend)?))
    }

    pub fn from_allocator(allocator: BlockAllocator<B>) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    pub fn reserve(&self, request: &MemoryRequest) -> AllocResult<RegionHandle> {
        self.inner.lock()?.reserve(request)
    }

    pub fn release(&self, handle: RegionHandle) -> AllocResult<()> {
        self.inner.lock()?.release(handle);
        Ok(())
    }

    pub fn reclaim(&self, handle: RegionHandle) -> AllocResult<()> {
        self.inner.lock()?.reclaim(handle);
        Ok(())
    }

    pub fn retain(&self, handle: RegionHandle) -> AllocResult<()> {
        self.inner.lock()?.retain(handle);
        Ok(())
    }

    pub fn collect(&self) -> AllocResult<bool> {
        Ok(self.inner.lock()?.collect())
    }

    pub fn release_all(&self) -> AllocResult<()> {
        self.inner.lock()?.release_all();
        Ok(())
    }

    pub fn stats(&self) -> AllocResult<AllocatorStats> {
        Ok(self.inner.lock()?.stats().clone())
    }

    /// Run `f` with exclusive access to the allocator
    ///
    /// Use for queries and for reaching the backend (e.g. to read region bytes)
    /// while no other thread can move regions around.
    pub fn with_allocator<R>(&self, f: impl FnOnce(&mut BlockAllocator<B>) -> R) -> AllocResult<R> {
        let mut guard = self.inner.lock()?;
        Ok(f(&mut guard))
    }

    pub fn into_inner(self) -> AllocResult<BlockAllocator<B>> {
        Ok(self.inner.into_inner()?)
    }

    /// Destroy the wrapped allocator, returning the backend
    pub fn destroy(self) -> AllocResult<B> {
        Ok(self.into_inner()?.destroy())
    }
}
