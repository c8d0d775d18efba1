//! Public types for the sync orchestrator.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncCycleReport {
    /// Mutations accepted by the backend this cycle
    pub uploaded: usize,
    /// Job results and notifications merged locally this cycle
    pub downloaded: usize,
    /// Mutations dead-lettered this cycle (permanent failures)
    pub failed: usize,
    /// Human-readable errors, transient and permanent
    pub errors: Vec<String>,
    /// True when the cycle did not run (offline, or another cycle active)
    pub skipped: bool,
}

impl SyncCycleReport {
    /// A cycle that never ran.
    #[must_use]
    pub fn skipped() -> Self {
        Self { skipped: true, ..Default::default() }
    }

    /// Whether everything attempted this cycle succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.skipped && self.errors.is_empty()
    }
}

/// Min-heap of retry deadlines keyed by `next_attempt_ms`.
///
/// Advisory only; the mutation queue in the store is the source of truth.
/// The orchestrator run loop peeks this to sleep precisely until the next
/// rescheduled mutation is due instead of polling on a timer.
#[derive(Debug, Default)]
pub struct DelayQueue {
    heap: BinaryHeap<Reverse<(i64, String)>>,
}

impl DelayQueue {
    #[must_use]
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    /// Schedule `id` for `at_ms`.
    pub fn push(&mut self, at_ms: i64, id: String) {
        self.heap.push(Reverse((at_ms, id)));
    }

    /// Earliest scheduled deadline, if any.
    #[must_use]
    pub fn next_due_ms(&self) -> Option<i64> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Pop every entry due at `now`, earliest first.
    pub fn pop_due(&mut self, now: i64) -> Vec<String> {
        let mut due = Vec::new();
        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((_, id))) = self.heap.pop() else { break };
            due.push(id);
        }
        due
    }

    /// Time until the next deadline, measured from `now`.
    /// `None` when empty; zero when overdue.
    #[must_use]
    pub fn time_until_next(&self, now: i64) -> Option<Duration> {
        self.next_due_ms()
            .map(|at| Duration::from_millis(at.saturating_sub(now).max(0) as u64))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
