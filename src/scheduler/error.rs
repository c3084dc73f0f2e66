//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Requested check interval is below the configured floor
    InvalidInterval { requested_ms: u64, minimum_ms: u64 },

    /// A rotation pool that must hold items was given none
    EmptyPool { pool: String },

    /// Another cycle holds the overlap guard
    CheckInProgress,

    /// Any other invalid engine setting
    InvalidConfig { field: String, reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval {
                requested_ms,
                minimum_ms,
            } => {
                write!(
                    f,
                    "Invalid scheduler config: check interval {}ms is below the minimum of {}ms",
                    requested_ms, minimum_ms
                )
            }
            Self::EmptyPool { pool } => {
                write!(
                    f,
                    "Invalid rotation config: the {} pool needs at least one item",
                    pool
                )
            }
            Self::CheckInProgress => write!(f, "Check already in progress"),
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid scheduler config in '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid interval error
    pub fn invalid_interval(requested_ms: u64, minimum_ms: u64) -> Self {
        Self::InvalidInterval {
            requested_ms,
            minimum_ms,
        }
    }

    /// Create an empty pool error
    pub fn empty_pool(pool: impl Into<String>) -> Self {
        Self::EmptyPool { pool: pool.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CheckInProgress)
    }
}
