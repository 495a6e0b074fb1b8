//! In-memory queue backend.
//!
//! Backs unit tests and embedders that drive the scheduler without a
//! spool directory.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{DrainOutcome, QueueBackend, QueueError};

/// A `VecDeque`-backed work queue.
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<serde_json::Value>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue pre-filled with `count` placeholder items.
    pub fn with_items(count: usize) -> Self {
        let items = (0..count)
            .map(|i| serde_json::json!({ "item": i }))
            .collect();
        Self {
            items: Mutex::new(items),
        }
    }

    /// Enqueues one item.
    pub fn push(&self, payload: serde_json::Value) {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(payload);
    }
}

impl QueueBackend for MemoryQueue {
    fn depth(&self) -> Result<u64, QueueError> {
        let items = self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(items.len() as u64)
    }

    fn process_one(&self, _budget: Duration) -> Result<DrainOutcome, QueueError> {
        let mut items = self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match items.pop_front() {
            Some(_) => Ok(DrainOutcome::Processed {
                remaining: items.len() as u64,
            }),
            None => Ok(DrainOutcome::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_to_empty() {
        let queue = MemoryQueue::with_items(2);

        assert_eq!(queue.depth().unwrap(), 2);
        assert_eq!(
            queue.process_one(Duration::from_secs(1)).unwrap(),
            DrainOutcome::Processed { remaining: 1 }
        );
        assert_eq!(
            queue.process_one(Duration::from_secs(1)).unwrap(),
            DrainOutcome::Processed { remaining: 0 }
        );
        assert_eq!(
            queue.process_one(Duration::from_secs(1)).unwrap(),
            DrainOutcome::Empty
        );
    }

    #[test]
    fn test_push() {
        let queue = MemoryQueue::new();
        queue.push(serde_json::json!({"entity": 42}));
        assert_eq!(queue.depth().unwrap(), 1);
    }
}
