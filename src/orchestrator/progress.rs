//! Progress gating for batch loops.
//!
//! Enrichment runs over hundreds of entities, so the callback fires only when
//! completion has advanced by at least `min_percentage_step` since the last
//! emission, and always on the final item.

use std::time::Instant;

use crate::ProgressFn;

/// Default percentage delta between emissions.
pub const DEFAULT_PERCENTAGE_STEP: f64 = 1.0;

/// Decides when a progress update is worth emitting.
#[derive(Debug, Clone)]
pub struct ProgressGate {
    /// Items processed so far.
    pub processed: usize,
    /// Total items in this phase.
    pub total: usize,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
    /// Emissions so far.
    pub emitted: usize,
    start_time: Instant,
}

impl ProgressGate {
    /// Gate for `total` items with the default 1% step.
    pub fn new(total: usize) -> Self {
        Self::with_step(total, DEFAULT_PERCENTAGE_STEP)
    }

    /// Gate with a custom percentage step.
    pub fn with_step(total: usize, min_percentage_step: f64) -> Self {
        Self {
            processed: 0,
            total,
            last_reported_percentage: 0.0,
            min_percentage_step: min_percentage_step.max(0.0),
            emitted: 0,
            start_time: Instant::now(),
        }
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed as f64 * 100.0) / self.total as f64
    }

    /// Whether the last item has been processed.
    pub fn is_final(&self) -> bool {
        self.processed >= self.total
    }

    /// Whether a progress update should be emitted now.
    pub fn should_emit_update(&self) -> bool {
        if self.processed == 0 {
            return false;
        }
        if self.is_final() {
            return true;
        }
        self.percentage() - self.last_reported_percentage >= self.min_percentage_step
    }

    /// Call after emitting to remember the reported percentage.
    pub fn mark_emitted(&mut self) {
        self.last_reported_percentage = self.percentage();
        self.emitted += 1;
    }

    /// Record one processed item and forward to `callback` if the gate opens.
    ///
    /// Returns whether an update was emitted.
    pub fn advance(&mut self, current: Option<&str>, callback: Option<&ProgressFn>) -> bool {
        self.processed = self.processed.saturating_add(1).min(self.total.max(1));
        if !self.should_emit_update() {
            return false;
        }
        if let Some(report) = callback {
            report(self.processed, self.total, current);
        }
        self.mark_emitted();
        true
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self, noun: &str) -> String {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let mut message = format!(
            "[PROGRESS] {}/{} {} - {:.0}% complete",
            self.processed,
            self.total,
            noun,
            self.percentage()
        );
        if elapsed > 0.0 && self.processed > 0 {
            message.push_str(&format!(" at {:.1}/sec", self.processed as f64 / elapsed));
        }
        message
    }
}
