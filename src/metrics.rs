//! Observability metrics for metadata runs
//!
//! Tracks request outcomes, throttling, retries, scheduler queue pressure and
//! per-run entity counts.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade; recording is a no-op until a recorder is installed
//! - [`init_metrics`] installs a Prometheus exporter with a scrape endpoint
//! - Every helper also emits a `tracing` event so runs without an exporter keep the data in logs

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls return `Ok(())` without rebinding.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "metadata_requests_total",
        Unit::Count,
        "Total number of requests made to the metadata API"
    );

    describe_counter!(
        "metadata_throttled_total",
        Unit::Count,
        "Total number of 429 service protection responses"
    );

    describe_counter!(
        "metadata_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "metadata_request_duration_seconds",
        Unit::Seconds,
        "Metadata request duration in seconds"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_histogram!(
        "scheduler_queue_wait_seconds",
        Unit::Seconds,
        "Time a request spent waiting for a scheduler slot"
    );

    describe_gauge!(
        "scheduler_in_flight",
        Unit::Count,
        "Requests currently holding a scheduler slot"
    );

    describe_counter!(
        "entities_fetched_total",
        Unit::Count,
        "Entities whose basic metadata was fetched"
    );

    describe_counter!(
        "entities_failed_total",
        Unit::Count,
        "Entities whose basic metadata could not be fetched"
    );

    describe_counter!(
        "attribute_casts_failed_total",
        Unit::Count,
        "Attribute cast requests that failed and were skipped"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one metadata request
pub struct RequestMetrics {
    endpoint: &'static str,
    start_time: Instant,
    correlation_id: String,
}

impl RequestMetrics {
    /// Start recording a request against an endpoint family (e.g. "entities")
    pub fn start(endpoint: &'static str) -> Self {
        let correlation_id = generate_correlation_id();
        debug!(
            correlation_id = %correlation_id,
            endpoint = endpoint,
            "Starting metadata request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record completion with an HTTP status
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "metadata_requests_total",
            "endpoint" => self.endpoint,
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "metadata_request_duration_seconds",
            "endpoint" => self.endpoint,
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!("metadata_throttled_total", "endpoint" => self.endpoint).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = self.endpoint,
                duration_ms = duration.as_millis() as u64,
                "Throttled by service protection (429)"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "Metadata request completed"
        );
    }

    /// Record a transport failure (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "metadata_requests_total",
            "endpoint" => self.endpoint,
            "status" => "network_error",
        )
        .increment(1);

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            duration_ms = duration.as_millis() as u64,
            "Network error recorded"
        );
    }

    /// Correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("metadata_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());
}

/// Record how long a request waited for a scheduler slot
pub fn record_queue_wait(wait: Duration) {
    histogram!("scheduler_queue_wait_seconds").record(wait.as_secs_f64());
    if wait > Duration::from_secs(1) {
        debug!(wait_ms = wait.as_millis() as u64, "Scheduler slot acquired after wait");
    }
}

/// Update the in-flight gauge
pub fn set_in_flight(in_flight: usize) {
    gauge!("scheduler_in_flight").set(in_flight as f64);
}

/// Record a skipped attribute cast
pub fn record_cast_failure(cast: &'static str) {
    counter!("attribute_casts_failed_total", "cast" => cast).increment(1);
}

/// Run-level metrics
pub struct RunMetrics {
    strategy: &'static str,
    start_time: Instant,
}

impl RunMetrics {
    /// Start tracking a run
    pub fn start(strategy: &'static str, requested: usize) -> Self {
        info!(strategy = strategy, requested = requested, "Metadata run started");
        Self {
            strategy,
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of a run
    pub fn record_outcome(&self, fetched: usize, failed: usize) {
        counter!("entities_fetched_total", "strategy" => self.strategy).increment(fetched as u64);
        counter!("entities_failed_total", "strategy" => self.strategy).increment(failed as u64);

        info!(
            strategy = self.strategy,
            fetched = fetched,
            failed = failed,
            duration_ms = self.start_time.elapsed().as_millis() as u64,
            "Metadata run finished"
        );
    }
}
