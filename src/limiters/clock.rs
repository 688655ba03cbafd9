//! Wall-clock helpers shared by the limiter implementations.
//!
//! The sliding algorithms quantise client-side time into sub-window starts;
//! the bucket algorithms work in whole seconds. All values are sent to the
//! coordinator as integers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ConfigError;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Seconds since the Unix epoch.
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Floor a millisecond timestamp to the start of its sub-window.
pub(crate) fn quantize(now_ms: i64, small_window_ms: i64) -> i64 {
    now_ms / small_window_ms * small_window_ms
}

/// Scale a caller-supplied window to whole milliseconds.
///
/// Redis expiry precision is one millisecond, so windows with a sub-ms
/// remainder cannot be represented and are rejected outright.
pub(crate) fn window_to_millis(window: Duration) -> Result<i64, ConfigError> {
    if window.is_zero() {
        return Err(ConfigError::ZeroWindow);
    }
    if window.subsec_nanos() % 1_000_000 != 0 {
        return Err(ConfigError::WindowNotMillisecondAligned);
    }
    Ok(window.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_floors_to_sub_window_start() {
        assert_eq!(quantize(10_500, 1_000), 10_000);
        assert_eq!(quantize(10_999, 1_000), 10_000);
        assert_eq!(quantize(11_000, 1_000), 11_000);
        assert_eq!(quantize(10_500, 250), 10_500);
    }

    #[test]
    fn window_scaling_accepts_whole_milliseconds() {
        assert_eq!(window_to_millis(Duration::from_secs(1)).unwrap(), 1_000);
        assert_eq!(window_to_millis(Duration::from_millis(250)).unwrap(), 250);
    }

    #[test]
    fn window_scaling_rejects_sub_millisecond_windows() {
        assert!(matches!(
            window_to_millis(Duration::from_micros(500)),
            Err(ConfigError::WindowNotMillisecondAligned)
        ));
        assert!(matches!(
            window_to_millis(Duration::from_micros(1_500)),
            Err(ConfigError::WindowNotMillisecondAligned)
        ));
    }

    #[test]
    fn window_scaling_rejects_zero_windows() {
        assert!(matches!(
            window_to_millis(Duration::ZERO),
            Err(ConfigError::ZeroWindow)
        ));
    }
}
