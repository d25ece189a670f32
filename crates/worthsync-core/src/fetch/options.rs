use std::time::Duration;

/// Default dedup window.
/// Matches the usual "same render cycle" grouping of concurrent readers.
pub const DEFAULT_DEDUPING_INTERVAL_MS: u64 = 2_000;

/// Retries after the first failed attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 2;

/// First retry delay; doubled for each further retry.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Per-attempt deadline.
/// 30s allows for slow responses while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Per-key fetch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub deduping_interval: Duration,
    pub retry_count: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            deduping_interval: Duration::from_millis(DEFAULT_DEDUPING_INTERVAL_MS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl FetchOptions {
    pub fn with_deduping_interval(mut self, interval: Duration) -> Self {
        self.deduping_interval = interval;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(factor)
    }
}
