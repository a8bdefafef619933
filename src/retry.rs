//! Retry schedule for transient tool failures.

use std::time::Duration;

/// Maximum execution attempts per tool call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base delay unit for the backoff schedule.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default growth factor applied per retry.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Pure retry policy value, shared read-only across concurrent executions.
///
/// The delay before retry `r` (1-based) is
/// `base_delay * (r - 1) * backoff_multiplier`: the first retry starts
/// immediately, later ones back off linearly in the retry ordinal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep before retry `retry` (1-based retry ordinal).
    #[must_use]
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let scaled = self.base_delay.as_millis() as f64
            * f64::from(retry.saturating_sub(1))
            * self.backoff_multiplier;
        Duration::from_millis(scaled.max(0.0) as u64)
    }
}
