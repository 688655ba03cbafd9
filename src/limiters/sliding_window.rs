//! Sliding window counter limiter.
//!
//! Approximates a rolling window by bucketing time into sub-windows and
//! aggregating their counts on the coordinator. The admission error is
//! bounded by one sub-window's worth of traffic.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use super::clock;
use super::RateLimiter;
use crate::error::{AcquireError, ConfigError, Result};

const TRY_ACQUIRE_SCRIPT_HASH_IMPL: &str = r#"
-- ARGV[1]: window size in milliseconds
-- ARGV[2]: admission limit for the window
-- ARGV[3]: current sub-window start
-- ARGV[4]: oldest sub-window start still inside the window

local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local currentSmallWindow = tonumber(ARGV[3])
local startSmallWindow = tonumber(ARGV[4])

-- Sum the live sub-windows, deleting expired ones as we go.
local counters = redis.call("hgetall", KEYS[1])
local count = 0
for i = 1, #(counters) / 2 do
    local smallWindow = tonumber(counters[i * 2 - 1])
    local counter = tonumber(counters[i * 2])
    if smallWindow < startSmallWindow then
        redis.call("hdel", KEYS[1], smallWindow)
    else
        count = count + counter
    end
end

if count >= limit then
    return 0
end

redis.call("hincrby", KEYS[1], currentSmallWindow, 1)
redis.call("pexpire", KEYS[1], window)
return 1
"#;

const TRY_ACQUIRE_SCRIPT_LIST_IMPL: &str = r#"
-- ARGV[1]: window size in milliseconds
-- ARGV[2]: admission limit for the window
-- ARGV[3]: current sub-window start
-- ARGV[4]: oldest sub-window start still inside the window
--
-- List layout: [running total, subWindow1, count1, subWindow2, count2, ...]

local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local currentSmallWindow = tonumber(ARGV[3])
local startSmallWindow = tonumber(ARGV[4])

local len = redis.call("llen", KEYS[1])
local counter = 0
if len == 0 then
    redis.call("rpush", KEYS[1], 0)
    len = len + 1
else
    counter = tonumber(redis.call("lindex", KEYS[1], 0))
    -- Drop the oldest pair once it falls out of the window, keeping the
    -- cached total in step.
    local smallWindow1 = tonumber(redis.call("lindex", KEYS[1], 1))
    if smallWindow1 ~= nil and smallWindow1 < startSmallWindow then
        local count1 = redis.call("lindex", KEYS[1], 2)
        counter = counter - count1
        len = len - 2
        redis.call("lrem", KEYS[1], 1, smallWindow1)
        redis.call("lrem", KEYS[1], 1, count1)
    end
end

if counter >= limit then
    return 0
end

-- Fold into the newest sub-window while it is still current, otherwise
-- open a new one.
if len > 1 then
    local lastSmallWindow = tonumber(redis.call("lindex", KEYS[1], -2))
    if lastSmallWindow >= currentSmallWindow then
        local lastCount = redis.call("lindex", KEYS[1], -1)
        redis.call("lset", KEYS[1], -1, lastCount + 1)
    else
        redis.call("rpush", KEYS[1], currentSmallWindow, 1)
    end
else
    redis.call("rpush", KEYS[1], currentSmallWindow, 1)
end

redis.call("lset", KEYS[1], 0, counter + 1)
redis.call("pexpire", KEYS[1], window)
return 1
"#;

/// Coordinator-side representation of the sub-window counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Representation {
    /// A hash of sub-window start to count.
    #[default]
    Hash,
    /// A list whose head caches the running total, avoiding a re-sum of
    /// every sub-window per call. Produces identical admission decisions.
    ///
    /// Removal is by element value (`LREM`), so a sub-window start that
    /// happens to equal a stored count can be deleted in its place. The
    /// hash representation has no such hazard and is the default.
    List,
}

/// Admits at most `limit` requests per rolling window of `window`,
/// approximated over `window / small_window` sub-windows.
pub struct SlidingWindowLimiter {
    /// Admission limit for the window
    limit: u32,
    /// Window size in milliseconds
    window: i64,
    /// Sub-window size in milliseconds
    small_window: i64,
    /// Number of sub-windows per window
    small_windows: i64,
    /// Coordinator connection
    conn: ConnectionManager,
    /// Admission script
    script: Script,
}

/// Check the parameters and scale both windows to milliseconds.
///
/// Returns `(window_ms, small_window_ms, sub_window_count)`.
fn validate(
    limit: u32,
    window: Duration,
    small_window: Duration,
) -> std::result::Result<(i64, i64, i64), ConfigError> {
    if limit == 0 {
        return Err(ConfigError::ZeroLimit);
    }
    let window = clock::window_to_millis(window)?;
    let small_window = clock::window_to_millis(small_window)?;
    if window % small_window != 0 {
        return Err(ConfigError::WindowNotDivisibleBySubWindow);
    }
    Ok((window, small_window, window / small_window))
}

impl SlidingWindowLimiter {
    /// Create a sliding window limiter using the hash representation.
    ///
    /// Both durations must be positive whole numbers of milliseconds and
    /// `window` must be an integer multiple of `small_window`.
    pub fn new(
        conn: ConnectionManager,
        limit: u32,
        window: Duration,
        small_window: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        Self::with_representation(conn, limit, window, small_window, Representation::default())
    }

    /// Create a sliding window limiter with an explicit state representation.
    pub fn with_representation(
        conn: ConnectionManager,
        limit: u32,
        window: Duration,
        small_window: Duration,
        representation: Representation,
    ) -> std::result::Result<Self, ConfigError> {
        let (window, small_window, small_windows) = validate(limit, window, small_window)?;

        let script = match representation {
            Representation::Hash => Script::new(TRY_ACQUIRE_SCRIPT_HASH_IMPL),
            Representation::List => Script::new(TRY_ACQUIRE_SCRIPT_LIST_IMPL),
        };

        Ok(Self {
            limit,
            window,
            small_window,
            small_windows,
            conn,
            script,
        })
    }

    /// Ask for one admission against `resource`.
    pub async fn try_acquire(&self, resource: &str) -> Result<()> {
        let current_small_window = clock::quantize(clock::now_millis(), self.small_window);
        let start_small_window = current_small_window - self.small_window * (self.small_windows - 1);

        trace!(
            resource,
            limit = self.limit,
            window_ms = self.window,
            current_small_window,
            "checking sliding window admission"
        );

        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .script
            .key(resource)
            .arg(self.window)
            .arg(self.limit)
            .arg(current_small_window)
            .arg(start_small_window)
            .invoke_async(&mut conn)
            .await?;

        if admitted == 0 {
            debug!(resource, limit = self.limit, "sliding window limit reached");
            return Err(AcquireError::Rejected);
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn try_acquire(&self, resource: &str) -> Result<()> {
        self.try_acquire(resource).await
    }
}
