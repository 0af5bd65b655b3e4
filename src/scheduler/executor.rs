//! Request scheduler with bounded concurrency, priority dispatch and retry

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::fetcher::{FetchError, FetchResult};
use crate::metrics;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::queue::{Priority, QueueState};

/// Per-call scheduling options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Dispatch priority
    pub priority: Priority,
    /// Retry budget; `None` uses [`SchedulerConfig::max_retries`]
    pub max_retries: Option<u32>,
}

impl TaskOptions {
    /// Options with the given priority and the default retry budget
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            max_retries: None,
        }
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

type Grant = oneshot::Sender<SlotGuard>;

struct Shared {
    state: Mutex<QueueState<Grant>>,
    config: SchedulerConfig,
    cancel: Option<CancellationToken>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState<Grant>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while a request is running. Dropping it hands the slot to the next
/// queued task, or frees it when nothing is waiting.
struct SlotGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl SlotGuard {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            release_slot(&self.shared);
        }
    }
}

fn release_slot(shared: &Arc<Shared>) {
    let mut state = shared.lock();
    while let Some(task) = state.pop_next() {
        match task.grant.send(SlotGuard::new(Arc::clone(shared))) {
            Ok(()) => return,
            // The waiter went away (cancelled or dropped). Disarm so the guard
            // does not re-enter the lock we are holding.
            Err(mut unclaimed) => unclaimed.armed = false,
        }
    }
    state.finish();
    metrics::set_in_flight(state.in_flight());
}

/// Bounded-concurrency, priority-ordered executor for metadata requests.
///
/// Cloning is cheap and shares the same queue, so one scheduler can serve every
/// component of a run.
#[derive(Clone)]
pub struct RequestScheduler {
    shared: Arc<Shared>,
}

impl RequestScheduler {
    /// Create a scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a scheduler whose queued work is rejected once `token` is cancelled
    pub fn with_cancellation(config: SchedulerConfig, token: CancellationToken) -> Self {
        Self::build(config, Some(token))
    }

    fn build(config: SchedulerConfig, cancel: Option<CancellationToken>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new(config.concurrency)),
                config,
                cancel,
            }),
        }
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Requests currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight()
    }

    /// Requests waiting for a slot
    pub fn queued(&self) -> usize {
        self.shared.lock().queued()
    }

    /// Run `invoke` under the concurrency limit, retrying transient failures.
    ///
    /// Each attempt waits for a slot at `options.priority`. Transient errors
    /// ([`FetchError::is_transient`]) are retried up to the task's budget with
    /// exponential backoff; the slot is released while backing off. Any other
    /// error, or the last transient one, is returned to the caller.
    pub async fn execute<T, F, Fut>(&self, mut invoke: F, options: TaskOptions) -> FetchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let max_retries = options
            .max_retries
            .unwrap_or(self.shared.config.max_retries);
        let mut attempt: u32 = 0;

        loop {
            let result = {
                let _slot = self.acquire(options.priority).await?;
                invoke().await
            };

            match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() && attempt < max_retries => {
                    let backoff = self
                        .shared
                        .config
                        .backoff_for(attempt, error.retry_after());
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = max_retries + 1,
                        priority = %options.priority,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying after backoff"
                    );
                    metrics::record_retry_backoff(backoff, attempt + 1);
                    self.sleep(backoff).await?;
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_transient() {
                        warn!(
                            attempts = attempt + 1,
                            error = %error,
                            "Retries exhausted"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn acquire(&self, priority: Priority) -> FetchResult<SlotGuard> {
        if self.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let waiting_since = Instant::now();
        let receiver = {
            let mut state = self.shared.lock();
            if state.try_start() {
                metrics::set_in_flight(state.in_flight());
                return Ok(SlotGuard::new(Arc::clone(&self.shared)));
            }
            let (grant, receiver) = oneshot::channel();
            let seq = state.enqueue(priority, grant);
            debug!(
                seq = seq,
                priority = %priority,
                queued = state.queued(),
                "All slots busy, request queued"
            );
            receiver
        };

        let granted = match &self.shared.cancel {
            Some(token) => tokio::select! {
                granted = receiver => granted,
                _ = token.cancelled() => return Err(FetchError::Cancelled),
            },
            None => receiver.await,
        };

        metrics::record_queue_wait(waiting_since.elapsed());
        granted.map_err(|_| FetchError::Cancelled)
    }

    async fn sleep(&self, delay: std::time::Duration) -> FetchResult<()> {
        match &self.shared.cancel {
            Some(token) => tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(()),
                _ = token.cancelled() => Err(FetchError::Cancelled),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shared
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("RequestScheduler")
            .field("limit", &state.limit())
            .field("in_flight", &state.in_flight())
            .field("queued", &state.queued())
            .finish()
    }
}
