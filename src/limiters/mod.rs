//! Admission limiters coordinated through Redis.
//!
//! Every limiter follows the same shape: an immutable configuration object
//! bound to one connection and one Lua script. All mutable state lives on
//! the coordinator under the caller-supplied resource key, and every
//! read-modify-write happens inside a single atomic script evaluation, so
//! concurrent clients can never race each other. The limiters themselves
//! cache nothing between calls.

mod clock;
mod fixed_window;
mod leaky_bucket;
mod sliding_log;
mod sliding_window;
#[cfg(test)]
pub(crate) mod test_support;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use leaky_bucket::LeakyBucketLimiter;
pub use sliding_log::{SlidingLogLimiter, SlidingLogStrategy};
pub use sliding_window::{Representation, SlidingWindowLimiter};
pub use token_bucket::TokenBucketLimiter;

use async_trait::async_trait;

use crate::error::Result;

/// Trait implemented by all five limiter algorithms.
///
/// This abstracts over the sibling implementations so callers can hold any
/// limiter behind one object-safe surface.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Ask whether one request against `resource` may proceed right now.
    ///
    /// Returns `Ok(())` when the request is admitted. Rejections are
    /// [`AcquireError::Rejected`] or, for the multi-strategy limiter,
    /// [`AcquireError::ViolatedStrategy`]. Any transport or script failure
    /// is surfaced verbatim as [`AcquireError::Coordinator`]; the admission
    /// decision is then unknown and callers must treat it as not admitted.
    ///
    /// Dropping the returned future before the command has been flushed to
    /// the coordinator leaves no admission and no state change. Dropping it
    /// after dispatch yields an indeterminate outcome: the script may or may
    /// not have run.
    ///
    /// [`AcquireError::Rejected`]: crate::error::AcquireError::Rejected
    /// [`AcquireError::ViolatedStrategy`]: crate::error::AcquireError::ViolatedStrategy
    /// [`AcquireError::Coordinator`]: crate::error::AcquireError::Coordinator
    async fn try_acquire(&self, resource: &str) -> Result<()>;
}
