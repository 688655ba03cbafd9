//! Error types for Floodgate limiters.

use std::time::Duration;

use thiserror::Error;

/// Outcome of a failed admission attempt.
#[derive(Error, Debug)]
pub enum AcquireError {
    /// The resource has reached its configured capacity.
    #[error("resource admission rejected")]
    Rejected,

    /// A specific strategy of a multi-strategy limiter was violated.
    ///
    /// `window` is the duration the caller configured, before any internal
    /// unit scaling.
    #[error("violated strategy with limit = {limit} and window = {window:?}")]
    ViolatedStrategy {
        /// Admission limit of the violated strategy
        limit: u32,
        /// Window of the violated strategy
        window: Duration,
    },

    /// The coordinator failed to evaluate the admission script.
    ///
    /// The admission decision is unknown; callers must treat this as not
    /// admitted and may retry with backoff.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] redis::RedisError),
}

/// Errors raised at limiter construction for inconsistent parameters.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Redis expiry precision is one millisecond, so every window must be a
    /// whole number of milliseconds.
    #[error("the window must be a whole number of milliseconds")]
    WindowNotMillisecondAligned,

    /// The window cannot be split into a whole number of small windows.
    #[error("the window must be divisible by the small window")]
    WindowNotDivisibleBySubWindow,

    /// A multi-strategy limiter needs at least one strategy.
    #[error("at least one strategy is required")]
    NoStrategies,

    /// A smaller window must carry a smaller limit.
    #[error("a smaller window must carry a strictly smaller limit")]
    NonMonotonicStrategies,

    /// Limits, levels and capacities must admit at least one request.
    #[error("the limit must be a positive integer")]
    ZeroLimit,

    /// Drain and replenishment rates must make forward progress.
    #[error("the rate must be a positive integer")]
    ZeroRate,

    /// A window of zero length can never admit anything.
    #[error("the window must be a positive duration")]
    ZeroWindow,

    /// Failed to parse a limiter configuration document.
    #[error("failed to parse limiter configuration: {0}")]
    Parse(String),

    /// I/O errors while reading a configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for admission attempts.
pub type Result<T> = std::result::Result<T, AcquireError>;
