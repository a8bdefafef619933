//! Engine configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default cap on simultaneously executing tool calls.
pub const DEFAULT_CONCURRENCY: usize = 5;
/// Default overall deadline for one `execute` batch.
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(120);
/// Default size of the approval audit ring buffer.
pub const DEFAULT_APPROVAL_RECORD_CAP: usize = 256;

/// Tunables for the turn-execution engine, passed by value at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Width of the execution semaphore.
    pub concurrency: usize,
    /// Overall deadline for one batch of tool calls.
    pub execute_timeout: Duration,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub approval_record_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            approval_record_cap: DEFAULT_APPROVAL_RECORD_CAP,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_execute_timeout(mut self, timeout: Duration) -> Self {
        self.execute_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Sizing and summarization settings for the result cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached entries before the oldest is evicted.
    pub capacity: usize,
    /// Age past which an entry is treated as a miss on read.
    pub max_age: Duration,
    /// Line count above which a formatted result is summarized.
    pub summarize_max_lines: usize,
    /// Character count above which a formatted result is summarized.
    pub summarize_max_chars: usize,
    /// Lines kept at each end of a head/tail summary.
    pub summary_edge_lines: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            max_age: Duration::from_secs(30 * 60),
            summarize_max_lines: 50,
            summarize_max_chars: 4000,
            summary_edge_lines: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::EngineConfig;

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::new()
            .with_concurrency(2)
            .with_execute_timeout(Duration::from_secs(10));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.execute_timeout, Duration::from_secs(10));
    }

    #[test]
    fn concurrency_has_a_floor_of_one() {
        assert_eq!(EngineConfig::new().with_concurrency(0).concurrency, 1);
    }
}
