//! Throttle Error Types
//!
//! Errors raised while constructing a throttler or its parts, and invariant
//! violations detected at runtime. Admission rejections are not errors; see
//! [`AdmissionResult`](crate::AdmissionResult).

/// Error types for throttling
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThrottleError {
    /// Capacity limit below one
    #[error("Capacity limit must be >= 1, got {0}")]
    InvalidCapacityLimit(usize),

    /// Quota fraction outside [0, 1]
    #[error("Max fraction must be in range [0, 1], got {0}")]
    InvalidFraction(f64),

    /// Reject probability outside [0, 1]
    #[error("Reject probability must be in range [0, 1], got {0}")]
    InvalidProbability(f64),

    /// More permits released than were ever acquired
    #[error("Semaphore released too many times (limit {0})")]
    ReleasedTooManyTimes(usize),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for throttle operations
pub type Result<T> = std::result::Result<T, ThrottleError>;
