//! Reconnection policy and exponential backoff.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnects attempted before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub cap_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(3_000),
            multiplier: 2.0,
            cap_delay: Duration::from_millis(30_000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based):
    /// `min(base * multiplier^(attempt - 1), cap)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let delay_millis = self.base_delay.as_millis() as f64 * factor;
        let cap_millis = self.cap_delay.as_millis() as f64;
        // NaN and infinity land on the cap.
        if delay_millis.is_finite() && delay_millis < cap_millis {
            Duration::from_millis(delay_millis as u64)
        } else {
            self.cap_delay
        }
    }

    /// Whether another reconnect may follow `attempts_made`.
    #[must_use]
    pub const fn should_reconnect(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
