//! Per-queue idle tracking.
//!
//! Every queue starts with a countdown of idle cycles. A tick that
//! finds the queue empty with nothing in flight decrements it; any
//! observed activity resets it. The scheduler shuts down once every
//! queue's countdown has reached zero.

use std::collections::HashMap;

/// Tracks consecutive idle cycles for a set of queues.
#[derive(Debug)]
pub struct IdleTracker {
    threshold: u32,
    counters: HashMap<String, u32>,
}

impl IdleTracker {
    /// Creates a tracker for the given queues, each counter starting
    /// at `threshold`.
    pub fn new<I, S>(queues: I, threshold: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let counters = queues.into_iter().map(|q| (q.into(), threshold)).collect();
        Self {
            threshold,
            counters,
        }
    }

    /// Records observed activity for a queue: work pending or a child
    /// spawned. A tick that finds the queue empty with children still
    /// in flight leaves the counter where it is.
    pub fn reset(&mut self, queue: &str) {
        if let Some(counter) = self.counters.get_mut(queue) {
            *counter = self.threshold;
        }
    }

    /// Records one empty-and-idle cycle. Clamped at zero; only the
    /// zero/non-zero distinction matters downstream.
    pub fn decrement(&mut self, queue: &str) {
        if let Some(counter) = self.counters.get_mut(queue) {
            *counter = counter.saturating_sub(1);
        }
    }

    /// Returns a queue's current countdown, if the queue is tracked.
    pub fn counter(&self, queue: &str) -> Option<u32> {
        self.counters.get(queue).copied()
    }

    /// True when every tracked queue has counted down to zero.
    pub fn all_idle(&self) -> bool {
        self.counters.values().all(|&c| c == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_threshold() {
        let tracker = IdleTracker::new(["ingest", "reindex"], 3);

        assert_eq!(tracker.counter("ingest"), Some(3));
        assert_eq!(tracker.counter("reindex"), Some(3));
        assert!(!tracker.all_idle());
    }

    #[test]
    fn test_decrement_clamps_at_zero() {
        let mut tracker = IdleTracker::new(["ingest"], 2);

        tracker.decrement("ingest");
        tracker.decrement("ingest");
        tracker.decrement("ingest");
        tracker.decrement("ingest");

        assert_eq!(tracker.counter("ingest"), Some(0));
    }

    #[test]
    fn test_reset_restores_threshold() {
        let mut tracker = IdleTracker::new(["ingest"], 3);

        tracker.decrement("ingest");
        tracker.decrement("ingest");
        assert_eq!(tracker.counter("ingest"), Some(1));

        tracker.reset("ingest");
        assert_eq!(tracker.counter("ingest"), Some(3));
    }

    #[test]
    fn test_all_idle_requires_every_queue() {
        let mut tracker = IdleTracker::new(["a", "b"], 1);

        tracker.decrement("a");
        assert!(!tracker.all_idle());

        tracker.decrement("b");
        assert!(tracker.all_idle());
    }

    #[test]
    fn test_unknown_queue_is_ignored() {
        let mut tracker = IdleTracker::new(["ingest"], 2);
        tracker.decrement("unknown");
        tracker.reset("unknown");
        assert_eq!(tracker.counter("unknown"), None);
        assert_eq!(tracker.counter("ingest"), Some(2));
    }

    #[test]
    fn test_zero_threshold_starts_idle() {
        let tracker = IdleTracker::new(["ingest"], 0);
        assert!(tracker.all_idle());
    }
}
