//! Leaky bucket limiter.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use super::clock;
use super::RateLimiter;
use crate::error::{AcquireError, ConfigError, Result};

const TRY_ACQUIRE_SCRIPT: &str = r#"
-- ARGV[1]: peak water level
-- ARGV[2]: drain velocity in drops per second
-- ARGV[3]: current time in seconds
-- ARGV[4]: key time-to-live in seconds

local peakLevel = tonumber(ARGV[1])
local currentVelocity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local lastTime = tonumber(redis.call("hget", KEYS[1], "lastTime"))
local currentLevel = tonumber(redis.call("hget", KEYS[1], "currentLevel"))
if lastTime == nil then
    lastTime = now
    currentLevel = 0
    redis.call("hset", KEYS[1], "currentLevel", currentLevel, "lastTime", lastTime)
end

-- Drain for the whole seconds elapsed since the last observation.
local interval = now - lastTime
if interval > 0 then
    local newLevel = currentLevel - interval * currentVelocity
    if newLevel < 0 then
        newLevel = 0
    end
    currentLevel = newLevel
    redis.call("hset", KEYS[1], "currentLevel", newLevel, "lastTime", now)
end

if currentLevel >= peakLevel then
    return 0
end

redis.call("hincrby", KEYS[1], "currentLevel", 1)
redis.call("expire", KEYS[1], ttl)
return 1
"#;

/// Admits requests while the water level stays below `peak_level`, draining
/// `velocity` drops per whole elapsed second.
///
/// Timestamps have second resolution, so successive calls within the same
/// second observe a zero interval and do not drain.
pub struct LeakyBucketLimiter {
    /// Peak water level
    peak_level: u32,
    /// Drain velocity in drops per second
    velocity: u32,
    /// Key time-to-live in seconds, the full drain horizon rounded up
    ttl: i64,
    /// Coordinator connection
    conn: ConnectionManager,
    /// Admission script
    script: Script,
}

/// Check the parameters and compute the key time-to-live.
///
/// The bucket takes `peak_level / velocity` seconds to drain completely;
/// rounding up keeps the key alive through the last partial second when the
/// division is not exact.
fn validate(peak_level: u32, velocity: u32) -> std::result::Result<i64, ConfigError> {
    if peak_level == 0 {
        return Err(ConfigError::ZeroLimit);
    }
    if velocity == 0 {
        return Err(ConfigError::ZeroRate);
    }
    Ok(i64::from(peak_level.div_ceil(velocity)))
}

impl LeakyBucketLimiter {
    /// Create a leaky bucket limiter.
    ///
    /// Both parameters must be positive.
    pub fn new(
        conn: ConnectionManager,
        peak_level: u32,
        velocity: u32,
    ) -> std::result::Result<Self, ConfigError> {
        let ttl = validate(peak_level, velocity)?;

        Ok(Self {
            peak_level,
            velocity,
            ttl,
            conn,
            script: Script::new(TRY_ACQUIRE_SCRIPT),
        })
    }

    /// Ask for one admission against `resource`.
    pub async fn try_acquire(&self, resource: &str) -> Result<()> {
        trace!(
            resource,
            peak_level = self.peak_level,
            velocity = self.velocity,
            "checking leaky bucket admission"
        );

        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .script
            .key(resource)
            .arg(self.peak_level)
            .arg(self.velocity)
            .arg(clock::now_secs())
            .arg(self.ttl)
            .invoke_async(&mut conn)
            .await?;

        if admitted == 0 {
            debug!(
                resource,
                peak_level = self.peak_level,
                "leaky bucket at peak level"
            );
            return Err(AcquireError::Rejected);
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for LeakyBucketLimiter {
    async fn try_acquire(&self, resource: &str) -> Result<()> {
        self.try_acquire(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiters::test_support;
    use std::time::Duration;

    #[test]
    fn validation_rejects_degenerate_parameters() {
        assert!(matches!(validate(0, 10), Err(ConfigError::ZeroLimit)));
        assert!(matches!(validate(60, 0), Err(ConfigError::ZeroRate)));
    }

    #[test]
    fn the_drain_horizon_rounds_up() {
        assert_eq!(validate(60, 10).unwrap(), 6);
        assert_eq!(validate(61, 10).unwrap(), 7);
        assert_eq!(validate(1, 10).unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires a Redis instance on 127.0.0.1:6379"]
    async fn the_bucket_fills_and_drains() {
        let conn = test_support::connection().await;
        let resource = test_support::unique_resource("leaky_bucket_drain");

        let limiter = LeakyBucketLimiter::new(conn, 60, 10).unwrap();

        let mut admitted = 0;
        for _ in 0..120 {
            if limiter.try_acquire(&resource).await.is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 60);

        // Three whole seconds drain 30 drops.
        tokio::time::sleep(Duration::from_secs(3)).await;

        let mut admitted = 0;
        for _ in 0..60 {
            if limiter.try_acquire(&resource).await.is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 30);
    }
}
