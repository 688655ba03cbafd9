//! Sliding log multi-strategy limiter.
//!
//! Evaluates several `(limit, window)` policies simultaneously against one
//! shared set of sub-window counters and reports which policy rejected a
//! request. All windows share the same sub-window resolution.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use super::clock;
use super::RateLimiter;
use crate::error::{AcquireError, ConfigError, Result};

const TRY_ACQUIRE_SCRIPT: &str = r#"
-- ARGV[1]: current sub-window start
-- ARGV[2]: window size in milliseconds of the first (longest) strategy
-- ARGV[i * 2 + 1]: oldest sub-window start of strategy i
-- ARGV[i * 2 + 2]: admission limit of strategy i

local currentSmallWindow = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local startSmallWindow = tonumber(ARGV[3])
local strategiesLen = #(ARGV) / 2 - 1

local counters = redis.call("hgetall", KEYS[1])
local counts = {}
for j = 1, strategiesLen do
    counts[j] = 0
end

-- Sum each strategy's window, deleting sub-windows older than the longest
-- window as we go.
for i = 1, #(counters) / 2 do
    local smallWindow = tonumber(counters[i * 2 - 1])
    local counter = tonumber(counters[i * 2])
    if smallWindow < startSmallWindow then
        redis.call("hdel", KEYS[1], smallWindow)
    else
        for j = 1, strategiesLen do
            if smallWindow >= tonumber(ARGV[j * 2 + 1]) then
                counts[j] = counts[j] + counter
            end
        end
    end
end

-- The first violated strategy rejects the request.
for i = 1, strategiesLen do
    if counts[i] >= tonumber(ARGV[i * 2 + 2]) then
        return i - 1
    end
end

redis.call("hincrby", KEYS[1], currentSmallWindow, 1)
redis.call("pexpire", KEYS[1], window)
return -1
"#;

/// One `(limit, window)` policy of a [`SlidingLogLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingLogStrategy {
    limit: u32,
    window: Duration,
}

impl SlidingLogStrategy {
    /// Describe a policy admitting at most `limit` requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// A validated strategy with its window scaled to coordinator units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Strategy {
    /// Admission limit for the window
    limit: u32,
    /// Caller-supplied window, reported on violation
    window: Duration,
    /// Window size in milliseconds
    window_ms: i64,
    /// Number of sub-windows covering the window
    small_windows: i64,
}

/// Admits a request only when every configured strategy still has headroom.
pub struct SlidingLogLimiter {
    /// Strategies sorted by descending window
    strategies: Vec<Strategy>,
    /// Sub-window size in milliseconds
    small_window: i64,
    /// Coordinator connection
    conn: ConnectionManager,
    /// Admission script
    script: Script,
}

/// Scale, sort and cross-check the strategy set.
///
/// Strategies are ordered by descending window, ties broken by descending
/// limit; a shorter window may never tolerate more traffic than a longer
/// one, so the limit sequence must then be strictly decreasing. Equal
/// windows sort their larger limit first, which makes the same check reject
/// duplicates and inversions.
fn sort_and_validate(
    small_window: Duration,
    strategies: &[SlidingLogStrategy],
) -> std::result::Result<(i64, Vec<Strategy>), ConfigError> {
    if strategies.is_empty() {
        return Err(ConfigError::NoStrategies);
    }
    let small_window = clock::window_to_millis(small_window)?;

    let mut scaled = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        if strategy.limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        scaled.push(Strategy {
            limit: strategy.limit,
            window: strategy.window,
            window_ms: clock::window_to_millis(strategy.window)?,
            small_windows: 0,
        });
    }

    scaled.sort_by(|a, b| b.window_ms.cmp(&a.window_ms).then(b.limit.cmp(&a.limit)));

    for i in 0..scaled.len() {
        if i > 0 && scaled[i].limit >= scaled[i - 1].limit {
            return Err(ConfigError::NonMonotonicStrategies);
        }
        if scaled[i].window_ms % small_window != 0 {
            return Err(ConfigError::WindowNotDivisibleBySubWindow);
        }
        scaled[i].small_windows = scaled[i].window_ms / small_window;
    }

    Ok((small_window, scaled))
}

impl SlidingLogLimiter {
    /// Create a sliding log limiter.
    ///
    /// `small_window` and every strategy window must be positive whole
    /// numbers of milliseconds, every strategy window must be an integer
    /// multiple of `small_window`, and at least one strategy is required.
    pub fn new(
        conn: ConnectionManager,
        small_window: Duration,
        strategies: &[SlidingLogStrategy],
    ) -> std::result::Result<Self, ConfigError> {
        let (small_window, strategies) = sort_and_validate(small_window, strategies)?;

        Ok(Self {
            strategies,
            small_window,
            conn,
            script: Script::new(TRY_ACQUIRE_SCRIPT),
        })
    }

    /// Ask for one admission against `resource`.
    pub async fn try_acquire(&self, resource: &str) -> Result<()> {
        let current_small_window = clock::quantize(clock::now_millis(), self.small_window);

        trace!(
            resource,
            strategies = self.strategies.len(),
            current_small_window,
            "checking sliding log admission"
        );

        let mut conn = self.conn.clone();
        let mut invocation = self.script.key(resource);
        invocation
            .arg(current_small_window)
            .arg(self.strategies[0].window_ms);
        for strategy in &self.strategies {
            invocation
                .arg(current_small_window - self.small_window * (strategy.small_windows - 1))
                .arg(strategy.limit);
        }

        let index: i64 = invocation.invoke_async(&mut conn).await?;
        if index >= 0 {
            let strategy = &self.strategies[index as usize];
            debug!(
                resource,
                limit = strategy.limit,
                window = ?strategy.window,
                "sliding log strategy violated"
            );
            return Err(AcquireError::ViolatedStrategy {
                limit: strategy.limit,
                window: strategy.window,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for SlidingLogLimiter {
    async fn try_acquire(&self, resource: &str) -> Result<()> {
        self.try_acquire(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiters::test_support;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn strategies_sort_by_descending_window() {
        let (small_window, sorted) = sort_and_validate(
            SECOND,
            &[
                SlidingLogStrategy::new(10, Duration::from_secs(60)),
                SlidingLogStrategy::new(100, Duration::from_secs(3600)),
            ],
        )
        .unwrap();

        assert_eq!(small_window, 1_000);
        assert_eq!(sorted[0].limit, 100);
        assert_eq!(sorted[0].window_ms, 3_600_000);
        assert_eq!(sorted[0].small_windows, 3_600);
        assert_eq!(sorted[1].limit, 10);
        assert_eq!(sorted[1].window_ms, 60_000);
        assert_eq!(sorted[1].small_windows, 60);
    }

    #[test]
    fn a_longer_window_may_carry_a_larger_limit() {
        let (_, sorted) = sort_and_validate(
            SECOND,
            &[
                SlidingLogStrategy::new(15, Duration::from_secs(60)),
                SlidingLogStrategy::new(10, Duration::from_secs(30)),
            ],
        )
        .unwrap();

        assert_eq!(sorted[0].window, Duration::from_secs(60));
        assert_eq!(sorted[1].window, Duration::from_secs(30));
    }

    #[test]
    fn equal_limits_are_rejected() {
        assert!(matches!(
            sort_and_validate(
                SECOND,
                &[
                    SlidingLogStrategy::new(10, Duration::from_secs(60)),
                    SlidingLogStrategy::new(10, SECOND),
                ],
            ),
            Err(ConfigError::NonMonotonicStrategies)
        ));
    }

    #[test]
    fn an_inverted_limit_sequence_is_rejected() {
        assert!(matches!(
            sort_and_validate(
                SECOND,
                &[
                    SlidingLogStrategy::new(5, Duration::from_secs(60)),
                    SlidingLogStrategy::new(10, Duration::from_secs(30)),
                ],
            ),
            Err(ConfigError::NonMonotonicStrategies)
        ));
    }

    #[test]
    fn duplicate_strategies_are_rejected() {
        assert!(matches!(
            sort_and_validate(
                SECOND,
                &[
                    SlidingLogStrategy::new(10, Duration::from_secs(60)),
                    SlidingLogStrategy::new(10, Duration::from_secs(60)),
                ],
            ),
            Err(ConfigError::NonMonotonicStrategies)
        ));
    }

    #[test]
    fn an_empty_strategy_set_is_rejected() {
        assert!(matches!(
            sort_and_validate(SECOND, &[]),
            Err(ConfigError::NoStrategies)
        ));
    }

    #[test]
    fn indivisible_strategy_windows_are_rejected() {
        assert!(matches!(
            sort_and_validate(
                Duration::from_millis(300),
                &[SlidingLogStrategy::new(10, SECOND)],
            ),
            Err(ConfigError::WindowNotDivisibleBySubWindow)
        ));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(matches!(
            sort_and_validate(SECOND, &[SlidingLogStrategy::new(0, Duration::from_secs(60))]),
            Err(ConfigError::ZeroLimit)
        ));
    }

    #[tokio::test]
    #[ignore = "requires a Redis instance on 127.0.0.1:6379"]
    async fn the_violated_strategy_is_reported() {
        let conn = test_support::connection().await;
        let resource = test_support::unique_resource("sliding_log_violation");

        let limiter = SlidingLogLimiter::new(
            conn,
            SECOND,
            &[
                SlidingLogStrategy::new(10, Duration::from_secs(30)),
                SlidingLogStrategy::new(15, Duration::from_secs(60)),
            ],
        )
        .unwrap();

        for _ in 0..10 {
            limiter.try_acquire(&resource).await.unwrap();
        }

        // The 30 second strategy is exhausted first; its caller-supplied
        // window is reported, not the millisecond-scaled internal value.
        match limiter.try_acquire(&resource).await {
            Err(AcquireError::ViolatedStrategy { limit, window }) => {
                assert_eq!(limit, 10);
                assert_eq!(window, Duration::from_secs(30));
            }
            other => panic!("expected a strategy violation, got {other:?}"),
        }
    }
}
