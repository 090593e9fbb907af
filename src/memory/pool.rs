//! Fixed-size metadata pool for region nodes
//!
//! A typed slab that hands out slots addressed by [`SlotId`]. Freed slots are
//! recycled without returning memory to the system, so creating and destroying
//! region nodes during split/coalesce never touches the global allocator once
//! the pool has warmed up.
//!
//! Slot ids are generational: reclaiming a slot bumps its generation, and any
//! id that still refers to the old generation stops resolving. This is what
//! lets the allocators detect stale region handles instead of silently
//! operating on a recycled node.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("metadata pool exhausted: limit of {limit} slots reached")]
    Exhausted { limit: usize },
}

/// Stable, generational address of a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// Typed slab of metadata nodes
#[derive(Debug)]
pub struct MetadataPool<T> {
    slots: Vec<Slot<T>>,
    // LIFO: recently freed slots are still warm in cache
    free_slots: Vec<u32>,
    len: usize,
    max_capacity: usize,
}

impl<T> MetadataPool<T> {
    /// Default number of slots allocated up front
    pub const DEFAULT_CAPACITY: usize = 32;

    /// Create a pool with room for `initial_capacity` nodes and no upper limit
    pub fn new(initial_capacity: usize) -> Self {
        Self::with_limit(initial_capacity, u32::MAX as usize)
    }

    /// Create a pool that refuses to grow beyond `max_capacity` slots
    pub fn with_limit(initial_capacity: usize, max_capacity: usize) -> Self {
        assert!(initial_capacity > 0, "Initial capacity cannot be zero");
        assert!(
            initial_capacity <= max_capacity,
            "Initial capacity cannot exceed the pool limit"
        );

        Self {
            slots: Vec::with_capacity(initial_capacity),
            free_slots: Vec::with_capacity(initial_capacity),
            len: 0,
            max_capacity: max_capacity.min(u32::MAX as usize),
        }
    }

    /// Store `value` in a free slot, growing the pool if needed
    pub fn reserve(&mut self, value: T) -> Result<SlotId, PoolError> {
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            self.len += 1;
            return Ok(SlotId {
                index,
                generation: slot.generation,
            });
        }

        if self.slots.len() >= self.max_capacity {
            return Err(PoolError::Exhausted {
                limit: self.max_capacity,
            });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            value: Some(value),
            generation: 0,
        });
        self.len += 1;
        Ok(SlotId {
            index,
            generation: 0,
        })
    }

    /// Return a slot to the pool, handing back its value
    ///
    /// Returns `None` if `id` is stale or was never issued by this pool.
    pub fn reclaim(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever created (live + free)
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reclaim every live slot, invalidating all outstanding ids
    pub fn clear(&mut self) {
        self.free_slots.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free_slots.push(index as u32);
        }
        self.len = 0;
    }
}

impl<T> Default for MetadataPool<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
