//! Priority queue state behind the request scheduler
//!
//! Pending tasks are bucketed by [`Priority`]; each bucket is FIFO by enqueue
//! sequence. The in-flight counter never exceeds the limit, and a task is only
//! queued when every slot is taken.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Dispatch priority. Higher values are dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Best-effort work such as attribute cast requests
    pub const LOW: Priority = Priority(0);
    /// Regular lookups such as OR-filter chunks
    pub const NORMAL: Priority = Priority(1);
    /// Primary metadata the run cannot do without
    pub const HIGH: Priority = Priority(2);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Priority::LOW => write!(f, "low"),
            Priority::NORMAL => write!(f, "normal"),
            Priority::HIGH => write!(f, "high"),
            Priority(other) => write!(f, "p{other}"),
        }
    }
}

/// A task waiting for a slot
#[derive(Debug)]
pub struct PendingTask<G> {
    /// Dispatch priority
    pub priority: Priority,
    /// Enqueue sequence number, strictly increasing per queue
    pub seq: u64,
    /// Handle used to hand the slot to the waiting caller
    pub grant: G,
}

/// Pending tasks plus in-flight accounting
#[derive(Debug)]
pub struct QueueState<G> {
    buckets: BTreeMap<Priority, VecDeque<PendingTask<G>>>,
    in_flight: usize,
    limit: usize,
    next_seq: u64,
}

impl<G> QueueState<G> {
    /// Empty queue allowing `limit` concurrent tasks (at least 1)
    pub fn new(limit: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            in_flight: 0,
            limit: limit.max(1),
            next_seq: 0,
        }
    }

    /// Claim a slot without queueing if one is free
    pub fn try_start(&mut self) -> bool {
        if self.in_flight < self.limit {
            self.in_flight += 1;
            true
        } else {
            false
        }
    }

    /// Queue a task behind the running ones; returns its sequence number
    pub fn enqueue(&mut self, priority: Priority, grant: G) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buckets
            .entry(priority)
            .or_default()
            .push_back(PendingTask {
                priority,
                seq,
                grant,
            });
        seq
    }

    /// Remove the next task to run: highest priority first, FIFO within a priority.
    ///
    /// The caller transfers its own slot to the returned task, so the in-flight
    /// count is unchanged.
    pub fn pop_next(&mut self) -> Option<PendingTask<G>> {
        let mut bucket = self.buckets.last_entry()?;
        let task = bucket.get_mut().pop_front();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        task
    }

    /// Give a slot back when no queued task took it over
    pub fn finish(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Tasks currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    /// Concurrency limit
    pub fn limit(&self) -> usize {
        self.limit
    }
}
