//! Priority request scheduling with retry
//!
//! Every metadata request of a run goes through one [`RequestScheduler`]. It caps
//! the number of requests in flight, dispatches waiting requests by [`Priority`]
//! (FIFO within a priority) and retries transient failures with exponential backoff.
//!
//! # Quick Start
//!
//! ```no_run
//! use dataverse_metadata_fetcher::scheduler::{Priority, RequestScheduler, SchedulerConfig, TaskOptions};
//! use dataverse_metadata_fetcher::FetchResult;
//!
//! # async fn example() -> FetchResult<()> {
//! let scheduler = RequestScheduler::new(SchedulerConfig::default().with_concurrency(4));
//! let value = scheduler
//!     .execute(|| async { Ok(42) }, TaskOptions::new(Priority::HIGH))
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`executor`] - The scheduler and its retry loop
//! - [`queue`] - Priority buckets and in-flight accounting
//! - [`config`] - Defaults and backoff calculation
//!
//! # Error Handling
//!
//! Errors are [`crate::fetcher::FetchError`]s. Network errors, 5xx and 429 are
//! retried; other client errors, parse errors and cancellation are returned at once.

pub mod config;
pub mod executor;
pub mod queue;

pub use config::SchedulerConfig;
pub use executor::{RequestScheduler, TaskOptions};
pub use queue::Priority;
