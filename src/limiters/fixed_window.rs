//! Fixed window counter limiter.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use super::clock;
use super::RateLimiter;
use crate::error::{AcquireError, ConfigError, Result};

const TRY_ACQUIRE_SCRIPT: &str = r#"
-- ARGV[1]: window size in milliseconds
-- ARGV[2]: admission limit for the window

local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])

local counter = tonumber(redis.call("get", KEYS[1]))
if counter == nil then
    counter = 0
end
if counter >= limit then
    return 0
end

redis.call("incr", KEYS[1])
if counter == 0 then
    redis.call("pexpire", KEYS[1], window)
end
return 1
"#;

/// Admits at most `limit` requests per fixed window.
///
/// The window starts at the first admission and the counter key expires a
/// full window later; expiry is deliberately not refreshed on subsequent
/// admissions. Bursts straddling a window boundary may reach `2 * limit`
/// over one window length, which is the classical fixed-window trade-off.
pub struct FixedWindowLimiter {
    /// Admission limit for the window
    limit: u32,
    /// Window size in milliseconds
    window: i64,
    /// Coordinator connection
    conn: ConnectionManager,
    /// Admission script
    script: Script,
}

/// Check the parameters and scale the window to milliseconds.
fn validate(limit: u32, window: Duration) -> std::result::Result<i64, ConfigError> {
    if limit == 0 {
        return Err(ConfigError::ZeroLimit);
    }
    clock::window_to_millis(window)
}

impl FixedWindowLimiter {
    /// Create a fixed window limiter.
    ///
    /// `window` must be a positive whole number of milliseconds and `limit`
    /// must be positive.
    pub fn new(
        conn: ConnectionManager,
        limit: u32,
        window: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let window = validate(limit, window)?;

        Ok(Self {
            limit,
            window,
            conn,
            script: Script::new(TRY_ACQUIRE_SCRIPT),
        })
    }

    /// Ask for one admission against `resource`.
    pub async fn try_acquire(&self, resource: &str) -> Result<()> {
        trace!(
            resource,
            limit = self.limit,
            window_ms = self.window,
            "checking fixed window admission"
        );

        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .script
            .key(resource)
            .arg(self.window)
            .arg(self.limit)
            .invoke_async(&mut conn)
            .await?;

        if admitted == 0 {
            debug!(resource, limit = self.limit, "fixed window limit reached");
            return Err(AcquireError::Rejected);
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn try_acquire(&self, resource: &str) -> Result<()> {
        self.try_acquire(resource).await
    }
}
