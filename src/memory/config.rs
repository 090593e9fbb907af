//! Block allocator configuration
//!
//! Limits are expressed in bytes (or counts) with 0 meaning "unlimited".
//! A configuration can be built in code, deserialized from JSON or read from
//! `REGIONFORGE_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::AllocResult;

const MIN_BLOCK_SIZE_ENV: &str = "REGIONFORGE_MIN_BLOCK_SIZE";
const MAX_BLOCK_SIZE_ENV: &str = "REGIONFORGE_MAX_BLOCK_SIZE";
const MAX_BLOCK_COUNT_ENV: &str = "REGIONFORGE_MAX_BLOCK_COUNT";
const MAX_POOL_SIZE_ENV: &str = "REGIONFORGE_MAX_POOL_SIZE";
const NEAREST_MULTIPLE_ENV: &str = "REGIONFORGE_NEAREST_MULTIPLE";
const MAX_REGIONS_PER_BLOCK_ENV: &str = "REGIONFORGE_MAX_REGIONS_PER_BLOCK";

/// Configuration for [`BlockAllocator`](super::BlockAllocator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockAllocatorConfig {
    /// Floor for the size of any newly created block
    pub minimum_block_size: usize,
    /// Largest block the allocator may create (0 = unlimited)
    pub maximum_block_size: usize,
    /// Maximum number of live blocks (0 = unlimited)
    pub maximum_block_count: usize,
    /// Maximum total bytes across live blocks (0 = unlimited)
    pub maximum_pool_size: usize,
    /// New block sizes are rounded up to this multiple (0 = no rounding)
    pub nearest_multiple: usize,
    /// Capacity hint for the block list and each block's metadata pool
    pub initial_capacity: usize,
    /// Region metadata slots per block (0 = unlimited); running out panics
    pub maximum_regions_per_block: usize,
}

impl BlockAllocatorConfig {
    /// 32 MiB: amortizes many small requests over one backend allocation
    pub const DEFAULT_MINIMUM_BLOCK_SIZE: usize = 32 * 1024 * 1024;
    pub const DEFAULT_INITIAL_CAPACITY: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_minimum_block_size(mut self, bytes: usize) -> Self {
        self.minimum_block_size = bytes;
        self
    }

    pub fn with_maximum_block_size(mut self, bytes: usize) -> Self {
        self.maximum_block_size = bytes;
        self
    }

    pub fn with_maximum_block_count(mut self, count: usize) -> Self {
        self.maximum_block_count = count;
        self
    }

    pub fn with_maximum_pool_size(mut self, bytes: usize) -> Self {
        self.maximum_pool_size = bytes;
        self
    }

    pub fn with_nearest_multiple(mut self, bytes: usize) -> Self {
        self.nearest_multiple = bytes;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_maximum_regions_per_block(mut self, count: usize) -> Self {
        self.maximum_regions_per_block = count;
        self
    }

    /// Check that the limits are consistent with each other
    pub fn validate(&self) -> AllocResult<()> {
        if self.maximum_block_size != 0 && self.minimum_block_size > self.maximum_block_size {
            return Err(config_error!(
                "minimum_block_size {} exceeds maximum_block_size {}",
                self.minimum_block_size,
                self.maximum_block_size
            ));
        }
        if self.maximum_pool_size != 0 && self.minimum_block_size > self.maximum_pool_size {
            return Err(config_error!(
                "minimum_block_size {} exceeds maximum_pool_size {}",
                self.minimum_block_size,
                self.maximum_pool_size
            ));
        }
        if self.nearest_multiple != 0 && !self.nearest_multiple.is_power_of_two() {
            return Err(config_error!(
                "nearest_multiple {} is not a power of two",
                self.nearest_multiple
            ));
        }
        if self.nearest_multiple != 0
            && self.maximum_block_size != 0
            && self.maximum_block_size % self.nearest_multiple != 0
        {
            return Err(config_error!(
                "maximum_block_size {} is not a multiple of nearest_multiple {}",
                self.maximum_block_size,
                self.nearest_multiple
            ));
        }
        if self.initial_capacity == 0 {
            return Err(config_error!("initial_capacity cannot be zero"));
        }
        // a split needs a second slot
        if self.maximum_regions_per_block == 1 {
            return Err(config_error!("maximum_regions_per_block must be 0 or at least 2"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> AllocResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| config_error!("failed to parse configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> AllocResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| config_error!("failed to serialize configuration: {}", e))
    }

    /// Build a configuration from `REGIONFORGE_*` environment variables
    ///
    /// Unset variables keep their default values.
    ///
    /// # Environment Variables
    ///
    /// - `REGIONFORGE_MIN_BLOCK_SIZE`
    /// - `REGIONFORGE_MAX_BLOCK_SIZE`
    /// - `REGIONFORGE_MAX_BLOCK_COUNT`
    /// - `REGIONFORGE_MAX_POOL_SIZE`
    /// - `REGIONFORGE_NEAREST_MULTIPLE`
    /// - `REGIONFORGE_MAX_REGIONS_PER_BLOCK`
    pub fn from_env() -> AllocResult<Self> {
        let mut config = Self::default();
        if let Some(value) = env_usize(MIN_BLOCK_SIZE_ENV)? {
            config.minimum_block_size = value;
        }
        if let Some(value) = env_usize(MAX_BLOCK_SIZE_ENV)? {
            config.maximum_block_size = value;
        }
        if let Some(value) = env_usize(MAX_BLOCK_COUNT_ENV)? {
            config.maximum_block_count = value;
        }
        if let Some(value) = env_usize(MAX_POOL_SIZE_ENV)? {
            config.maximum_pool_size = value;
        }
        if let Some(value) = env_usize(NEAREST_MULTIPLE_ENV)? {
            config.nearest_multiple = value;
        }
        if let Some(value) = env_usize(MAX_REGIONS_PER_BLOCK_ENV)? {
            config.maximum_regions_per_block = value;
        }
        config.validate()?;
        Ok(config)
    }
}

impl Default for BlockAllocatorConfig {
    fn default() -> Self {
        Self {
            minimum_block_size: Self::DEFAULT_MINIMUM_BLOCK_SIZE,
            maximum_block_size: 0,
            maximum_block_count: 0,
            maximum_pool_size: 0,
            nearest_multiple: 0,
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            maximum_regions_per_block: 0,
        }
    }
}

fn env_usize(name: &str) -> AllocResult<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| config_error!("{}={:?}: {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}
