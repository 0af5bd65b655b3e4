//! Cancellation for in-progress metadata runs.
//!
//! A [`CancellationToken`] is handed to the [`crate::scheduler::RequestScheduler`]
//! and the [`crate::orchestrator::FetchOrchestrator`]. Cancelling it rejects queued
//! requests, interrupts retry backoff and stops batch loops at the next batch
//! boundary. Requests already on the wire are left to complete.

pub use tokio_util::sync::CancellationToken;
