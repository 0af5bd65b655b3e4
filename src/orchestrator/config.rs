//! Orchestrator configuration constants

use std::time::Duration;

use crate::fetcher::odata::DEFAULT_CHUNK_SIZE;
use crate::orchestrator::progress::DEFAULT_PERCENTAGE_STEP;
use crate::scheduler::config::CAST_MAX_RETRIES;
use crate::scheduler::SchedulerConfig;

/// Environment variable enabling the cached-bulk strategy.
pub const CACHE_ENV_VAR: &str = "DATAVERSE_METADATA_CACHE";

/// Entities fetched per batch when a local cache absorbs throttling.
pub const BULK_BATCH_SIZE: usize = 100;

/// Entities fetched per batch when relationships force one call per entity.
pub const INDIVIDUAL_BATCH_SIZE: usize = 10;

/// Delay between individual-fetch batches in milliseconds.
pub const INDIVIDUAL_BATCH_DELAY_MS: u64 = 500;

/// Entities enriched with attributes per batch.
pub const ATTRIBUTE_BATCH_SIZE: usize = 50;

/// Delay between attribute batches in milliseconds.
pub const ATTRIBUTE_BATCH_DELAY_MS: u64 = 50;

/// Interpret a cache flag value: `true` (any case) or `1` enables.
pub fn parse_cache_flag(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Read [`CACHE_ENV_VAR`]; unset or any other value means disabled.
pub fn cache_enabled_from_env() -> bool {
    std::env::var(CACHE_ENV_VAR)
        .map(|v| parse_cache_flag(&v))
        .unwrap_or(false)
}

/// Tuning for [`crate::orchestrator::FetchOrchestrator`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Scheduler shared by every request of the run
    pub scheduler: SchedulerConfig,
    /// Keys per OR-filter request
    pub chunk_size: usize,
    /// Batch size of the cached-bulk strategy
    pub bulk_batch_size: usize,
    /// Delay between cached-bulk batches
    pub bulk_batch_delay: Duration,
    /// Batch size of the individual-with-relationships strategy
    pub individual_batch_size: usize,
    /// Delay between individual batches
    pub individual_batch_delay: Duration,
    /// Entities enriched per attribute batch
    pub attribute_batch_size: usize,
    /// Delay between attribute batches
    pub attribute_batch_delay: Duration,
    /// Retry budget for attribute cast requests
    pub cast_max_retries: u32,
    /// Minimum completion delta (percent) between attribute progress updates
    pub progress_step_percent: f64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            bulk_batch_size: BULK_BATCH_SIZE,
            bulk_batch_delay: Duration::ZERO,
            individual_batch_size: INDIVIDUAL_BATCH_SIZE,
            individual_batch_delay: Duration::from_millis(INDIVIDUAL_BATCH_DELAY_MS),
            attribute_batch_size: ATTRIBUTE_BATCH_SIZE,
            attribute_batch_delay: Duration::from_millis(ATTRIBUTE_BATCH_DELAY_MS),
            cast_max_retries: CAST_MAX_RETRIES,
            progress_step_percent: DEFAULT_PERCENTAGE_STEP,
        }
    }
}

impl FetchConfig {
    /// Replace the scheduler configuration
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set the OR-filter chunk size (at least 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the cached-bulk batch size and delay
    pub fn with_bulk_batches(mut self, size: usize, delay: Duration) -> Self {
        self.bulk_batch_size = size.max(1);
        self.bulk_batch_delay = delay;
        self
    }

    /// Set the individual-fetch batch size and delay
    pub fn with_individual_batches(mut self, size: usize, delay: Duration) -> Self {
        self.individual_batch_size = size.max(1);
        self.individual_batch_delay = delay;
        self
    }

    /// Set the attribute batch size and delay
    pub fn with_attribute_batches(mut self, size: usize, delay: Duration) -> Self {
        self.attribute_batch_size = size.max(1);
        self.attribute_batch_delay = delay;
        self
    }

    /// Set the retry budget for cast requests
    pub fn with_cast_max_retries(mut self, retries: u32) -> Self {
        self.cast_max_retries = retries;
        self
    }

    /// Set the attribute progress granularity in percent
    pub fn with_progress_step(mut self, percent: f64) -> Self {
        self.progress_step_percent = percent;
        self
    }

    /// Remove every inter-batch delay (tests and cached environments)
    pub fn without_delays(mut self) -> Self {
        self.bulk_batch_delay = Duration::ZERO;
        self.individual_batch_delay = Duration::ZERO;
        self.attribute_batch_delay = Duration::ZERO;
        self
    }
}
