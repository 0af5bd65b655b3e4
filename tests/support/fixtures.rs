//! Shared builders for orchestrator tests

use dataverse_metadata_fetcher::cancel::CancellationToken;
use dataverse_metadata_fetcher::orchestrator::{FetchConfig, FetchOrchestrator};
use dataverse_metadata_fetcher::scheduler::SchedulerConfig;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::mock_api::MockApi;

/// Scheduler with millisecond backoff
pub fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

/// Fetch config with fast retries and no inter-batch delays
pub fn fast_config() -> FetchConfig {
    FetchConfig::default()
        .with_scheduler(fast_scheduler())
        .without_delays()
}

/// Orchestrator over `api` with [`fast_config`]
pub fn orchestrator(api: &Arc<MockApi>) -> FetchOrchestrator {
    orchestrator_with(api, fast_config())
}

/// Orchestrator over `api` with a custom config
pub fn orchestrator_with(api: &Arc<MockApi>, config: FetchConfig) -> FetchOrchestrator {
    FetchOrchestrator::with_cancellation(api.clone(), config, CancellationToken::new())
}

/// Owned names
pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Basic attribute record
pub fn attribute(name: &str, attribute_type: &str) -> Value {
    json!({
        "LogicalName": name,
        "SchemaName": name,
        "AttributeType": attribute_type,
        "AttributeTypeName": { "Value": format!("{attribute_type}Type") },
        "IsPrimaryId": false,
        "IsPrimaryName": false,
        "RequiredLevel": { "Value": "None" }
    })
}

/// Progress callback that records every call
#[derive(Clone, Default)]
pub struct ProgressLog {
    calls: Arc<Mutex<Vec<(usize, usize, Option<String>)>>>,
}

impl ProgressLog {
    /// Record a call
    pub fn record(&self, done: usize, total: usize, current: Option<&str>) {
        self.calls
            .lock()
            .unwrap()
            .push((done, total, current.map(str::to_string)));
    }

    /// Calls so far
    pub fn calls(&self) -> Vec<(usize, usize, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Closure usable as a progress callback
    pub fn callback(&self) -> impl Fn(usize, usize, Option<&str>) + Send + Sync + 'static {
        let log = self.clone();
        move |done: usize, total: usize, current: Option<&str>| log.record(done, total, current)
    }
}
