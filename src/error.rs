//! Unified error handling for regionforge
//!
//! Two classes of failure exist in this crate:
//! - Contract violations (zero-size requests, foreign region handles, bad
//!   alignments). These are programmer errors and panic at the call site.
//! - Operational failures (no room in a block, no compatible region, a backend
//!   refusing an allocation, a configured limit being hit). These are returned
//!   as [`AllocError`] and leave the allocator state unchanged, so the caller
//!   may collect, release other regions or retry.

use std::fmt;

// Re-export thiserror for convenience
pub use thiserror;

/// Error type for every fallible allocator operation
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    // ========== Exhaustion ==========
    /// The block does not have enough unreserved bytes for the request
    #[error("Insufficient block capacity: requested {requested} bytes, {available} available")]
    InsufficientCapacity { requested: usize, available: usize },

    /// No free region satisfies size, alignment and property constraints
    #[error("No compatible free region for {size} bytes")]
    NoCompatibleRegion { size: usize },

    /// Creating another block would exceed the configured block count
    #[error("Block count limit reached: {max}")]
    BlockLimitExceeded { max: usize },

    /// Creating another block would exceed the configured pool size
    #[error("Pool size limit exceeded: {requested} bytes requested, limit {limit}")]
    PoolSizeExceeded { requested: usize, limit: usize },

    /// The request needs a block larger than the configured maximum
    #[error("Block too large: {requested} bytes, maximum {max}")]
    BlockTooLarge { requested: usize, max: usize },

    // ========== Backend ==========
    /// The block-allocate callback failed
    #[error("Block allocation failed: {0}")]
    BlockAllocationFailed(String),

    /// The region-allocate callback failed
    #[error("Region allocation failed: {0}")]
    RegionAllocationFailed(String),

    // ========== Configuration ==========
    /// Invalid allocator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Internal ==========
    /// A structural invariant of a block does not hold (indicates a bug)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Lock poisoned (a previous holder panicked mid-operation)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl AllocError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            AllocError::InsufficientCapacity { .. }
            | AllocError::NoCompatibleRegion { .. }
            | AllocError::BlockLimitExceeded { .. }
            | AllocError::PoolSizeExceeded { .. }
            | AllocError::BlockTooLarge { .. } => ErrorCategory::Exhausted,

            AllocError::BlockAllocationFailed(_) | AllocError::RegionAllocationFailed(_) => {
                ErrorCategory::Backend
            }

            AllocError::InvalidConfiguration(_) => ErrorCategory::Configuration,

            AllocError::InvariantViolation(_) | AllocError::LockPoisoned(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if the caller may reasonably retry after freeing memory
    ///
    /// Exhaustion and backend failures leave the allocator consistent, so a
    /// `collect()` followed by another `reserve()` is a valid reaction.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Exhausted | ErrorCategory::Backend
        )
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Out of space or over a configured limit
    Exhausted,
    /// The external allocator reported a failure
    Backend,
    /// Invalid configuration supplied by the caller
    Configuration,
    /// Indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Exhausted => write!(f, "Exhausted"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for AllocError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AllocError::LockPoisoned(err.to_string())
    }
}

/// Result type for allocator operations
pub type AllocResult<T> = std::result::Result<T, AllocError>;

/// Create a configuration error with context
///
/// # Examples
/// ```ignore
/// return Err(config_error!("minimum_block_size {} exceeds maximum", min));
/// ```
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::AllocError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AllocError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}

/// Create an invariant-violation error with context
#[macro_export]
macro_rules! invariant_error {
    ($msg:expr) => {
        $crate::error::AllocError::InvariantViolation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AllocError::InvariantViolation(format!($fmt, $($arg)*))
    };
}
