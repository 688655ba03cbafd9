//! Declarative limiter configuration.
//!
//! This module handles loading limiter descriptions from YAML and turning
//! them into live limiters. Durations are expressed in integer
//! milliseconds, the coordinator's native expiry precision.

use std::path::Path;
use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::limiters::{
    FixedWindowLimiter, LeakyBucketLimiter, RateLimiter, SlidingLogLimiter, SlidingLogStrategy,
    SlidingWindowLimiter, TokenBucketLimiter,
};

/// One strategy of a declaratively configured sliding log limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Admission limit for the window
    pub limit: u32,
    /// Window size in milliseconds
    pub window_ms: u64,
}

/// Declarative description of a limiter, loadable from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// A [`FixedWindowLimiter`]
    FixedWindow {
        /// Admission limit for the window
        limit: u32,
        /// Window size in milliseconds
        window_ms: u64,
    },
    /// A [`SlidingWindowLimiter`] in its hash representation
    SlidingWindow {
        /// Admission limit for the window
        limit: u32,
        /// Window size in milliseconds
        window_ms: u64,
        /// Sub-window size in milliseconds
        small_window_ms: u64,
    },
    /// A [`SlidingLogLimiter`]
    SlidingLog {
        /// Sub-window size in milliseconds
        small_window_ms: u64,
        /// The policies to enforce simultaneously
        strategies: Vec<StrategyConfig>,
    },
    /// A [`LeakyBucketLimiter`]
    LeakyBucket {
        /// Peak water level
        peak_level: u32,
        /// Drain velocity in drops per second
        velocity: u32,
    },
    /// A [`TokenBucketLimiter`]
    TokenBucket {
        /// Bucket capacity
        capacity: u32,
        /// Replenishment rate in tokens per second
        rate: u32,
    },
}

impl LimiterConfig {
    /// Load a limiter description from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a limiter description from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the description and build the limiter against `conn`.
    pub fn build(&self, conn: ConnectionManager) -> Result<Box<dyn RateLimiter>, ConfigError> {
        let limiter: Box<dyn RateLimiter> = match self {
            Self::FixedWindow { limit, window_ms } => Box::new(FixedWindowLimiter::new(
                conn,
                *limit,
                Duration::from_millis(*window_ms),
            )?),
            Self::SlidingWindow {
                limit,
                window_ms,
                small_window_ms,
            } => Box::new(SlidingWindowLimiter::new(
                conn,
                *limit,
                Duration::from_millis(*window_ms),
                Duration::from_millis(*small_window_ms),
            )?),
            Self::SlidingLog {
                small_window_ms,
                strategies,
            } => {
                let strategies: Vec<SlidingLogStrategy> = strategies
                    .iter()
                    .map(|s| SlidingLogStrategy::new(s.limit, Duration::from_millis(s.window_ms)))
                    .collect();
                Box::new(SlidingLogLimiter::new(
                    conn,
                    Duration::from_millis(*small_window_ms),
                    &strategies,
                )?)
            }
            Self::LeakyBucket {
                peak_level,
                velocity,
            } => Box::new(LeakyBucketLimiter::new(conn, *peak_level, *velocity)?),
            Self::TokenBucket { capacity, rate } => {
                Box::new(TokenBucketLimiter::new(conn, *capacity, *rate)?)
            }
        };
        Ok(limiter)
    }
}
