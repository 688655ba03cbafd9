//! Token bucket limiter.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use super::clock;
use super::RateLimiter;
use crate::error::{AcquireError, ConfigError, Result};

const TRY_ACQUIRE_SCRIPT: &str = r#"
-- ARGV[1]: bucket capacity
-- ARGV[2]: replenishment rate in tokens per second
-- ARGV[3]: current time in seconds
-- ARGV[4]: key time-to-live in seconds

local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local lastTime = tonumber(redis.call("hget", KEYS[1], "lastTime"))
local currentTokens = tonumber(redis.call("hget", KEYS[1], "currentTokens"))
if lastTime == nil then
    lastTime = now
    currentTokens = capacity
    redis.call("hset", KEYS[1], "currentTokens", currentTokens, "lastTime", lastTime)
end

-- Replenish for the whole seconds elapsed since the last observation.
local interval = now - lastTime
if interval > 0 then
    local newTokens = currentTokens + interval * rate
    if newTokens > capacity then
        newTokens = capacity
    end
    currentTokens = newTokens
    redis.call("hset", KEYS[1], "currentTokens", newTokens, "lastTime", now)
end

if currentTokens == 0 then
    return 0
end

redis.call("hincrby", KEYS[1], "currentTokens", -1)
redis.call("expire", KEYS[1], ttl)
return 1
"#;

/// Admits a request by spending one token; the bucket starts full and
/// replenishes `rate` tokens per whole elapsed second, capped at `capacity`.
pub struct TokenBucketLimiter {
    /// Bucket capacity
    capacity: u32,
    /// Replenishment rate in tokens per second
    rate: u32,
    /// Key time-to-live in seconds, the full refill horizon rounded up
    ttl: i64,
    /// Coordinator connection
    conn: ConnectionManager,
    /// Admission script
    script: Script,
}

/// Check the parameters and compute the key time-to-live.
///
/// An idle bucket is back at capacity after `capacity / rate` seconds;
/// rounding up keeps the key alive through the last partial second when the
/// division is not exact.
fn validate(capacity: u32, rate: u32) -> std::result::Result<i64, ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::ZeroLimit);
    }
    if rate == 0 {
        return Err(ConfigError::ZeroRate);
    }
    Ok(i64::from(capacity.div_ceil(rate)))
}

impl TokenBucketLimiter {
    /// Create a token bucket limiter.
    ///
    /// Both parameters must be positive.
    pub fn new(
        conn: ConnectionManager,
        capacity: u32,
        rate: u32,
    ) -> std::result::Result<Self, ConfigError> {
        let ttl = validate(capacity, rate)?;

        Ok(Self {
            capacity,
            rate,
            ttl,
            conn,
            script: Script::new(TRY_ACQUIRE_SCRIPT),
        })
    }

    /// Ask for one admission against `resource`.
    pub async fn try_acquire(&self, resource: &str) -> Result<()> {
        trace!(
            resource,
            capacity = self.capacity,
            rate = self.rate,
            "checking token bucket admission"
        );

        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .script
            .key(resource)
            .arg(self.capacity)
            .arg(self.rate)
            .arg(clock::now_secs())
            .arg(self.ttl)
            .invoke_async(&mut conn)
            .await?;

        if admitted == 0 {
            debug!(resource, "token bucket empty");
            return Err(AcquireError::Rejected);
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn try_acquire(&self, resource: &str) -> Result<()> {
        self.try_acquire(resource).await
    }
}
