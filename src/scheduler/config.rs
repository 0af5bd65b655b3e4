//! Scheduler configuration constants

use std::time::Duration;

/// Default number of requests allowed in flight at once.
/// Dataverse service protection rejects a user's requests beyond 52 concurrent calls;
/// staying well below leaves room for other clients sharing the same identity.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default retry budget for transient failures (network, 5xx, 429).
pub const MAX_RETRIES: u32 = 3;

/// Retry budget for best-effort attribute cast requests.
pub const CAST_MAX_RETRIES: u32 = 1;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000; // 30 seconds

fn backoff_between(initial: Duration, max: Duration, retry_count: u32) -> Duration {
    let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    initial.saturating_mul(factor).min(max)
}

/// Tuning for [`crate::scheduler::RequestScheduler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum simultaneous in-flight requests (at least 1)
    pub concurrency: usize,
    /// Retries for tasks that do not set their own budget
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for computed backoff (a server `Retry-After` may exceed it)
    pub max_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl SchedulerConfig {
    /// Set the concurrency limit (clamped to at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the default retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial and maximum backoff
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay before retry number `retry_count + 1`, honoring a server hint
    pub fn backoff_for(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        let computed = backoff_between(self.initial_backoff, self.max_backoff, retry_count);
        retry_after.map_or(computed, |hint| hint.max(computed))
    }
}
