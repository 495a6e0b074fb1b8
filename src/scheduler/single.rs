//! Degenerate drain modes that run without the event loop.
//!
//! `drain_one_item` is the entry point worker subprocesses execute: it
//! processes exactly one item and reports the remaining depth over
//! stdout. `drain_with_budget` is the synchronous strategy behind
//! single-child mode: it keeps draining until the queue empties or a
//! time budget runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::queue::{DrainOutcome, QueueBackend, QueueError};

/// Errors from the loop-less drain modes.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Lease of {0:?} expired before the item finished")]
    LeaseExpired(Duration),
}

/// Processes exactly one item from `queue` and returns the remaining
/// depth.
///
/// This is the whole body of a worker subprocess: the caller prints
/// the returned depth as the sole stdout line and exits 0, or exits
/// non-zero on error. An empty queue is not an error; the remaining
/// depth is simply 0.
pub async fn drain_one_item(
    backend: Arc<dyn QueueBackend>,
    queue: &str,
    lease: Duration,
) -> Result<u64, DrainError> {
    let started = Instant::now();
    let backend_for_work = Arc::clone(&backend);
    let budget = lease;

    let work = tokio::task::spawn_blocking(move || backend_for_work.process_one(budget));

    let outcome = match tokio::time::timeout(lease, work).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) => {
            return Err(QueueError::ProcessingFailed(format!(
                "worker task failed: {join_err}"
            ))
            .into())
        }
        Err(_) => return Err(DrainError::LeaseExpired(lease)),
    };

    match outcome {
        DrainOutcome::Processed { remaining } => {
            info!(
                queue,
                remaining,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Processed one item"
            );
            Ok(remaining)
        }
        DrainOutcome::Empty => {
            debug!(queue, "Queue empty, nothing to process");
            Ok(0)
        }
    }
}

/// Drains `backend` synchronously until it is empty or `budget` is
/// spent. Returns the remaining depth.
///
/// This blocks its caller for up to `budget`; it is the legacy
/// single-child strategy with an implicit concurrency bound of 1.
pub fn drain_with_budget(
    backend: &dyn QueueBackend,
    queue: &str,
    budget: Duration,
) -> Result<u64, QueueError> {
    let started = Instant::now();
    let mut processed = 0u64;

    let remaining = loop {
        if started.elapsed() >= budget {
            let depth = backend.depth()?;
            warn!(
                queue,
                processed,
                remaining = depth,
                "Drain budget exhausted with items left"
            );
            break depth;
        }

        match backend.process_one(budget - started.elapsed()) {
            Ok(DrainOutcome::Processed { remaining }) => {
                processed += 1;
                if remaining == 0 {
                    break 0;
                }
            }
            Ok(DrainOutcome::Empty) => break 0,
            Err(e) => {
                // One bad item must not abort the drain; the depth is
                // re-measured so stale state cannot accumulate.
                warn!(queue, error = %e, "Item failed during drain, continuing");
            }
        }
    };

    debug!(
        queue,
        processed,
        remaining,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Drain tick finished"
    );
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;

    #[tokio::test]
    async fn test_drain_one_item_reports_remaining() {
        let backend: Arc<dyn QueueBackend> = Arc::new(MemoryQueue::with_items(3));

        let remaining = drain_one_item(backend, "ingest", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn test_drain_one_item_empty_queue() {
        let backend: Arc<dyn QueueBackend> = Arc::new(MemoryQueue::new());

        let remaining = drain_one_item(backend, "ingest", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_drain_with_budget_empties_queue() {
        let queue = MemoryQueue::with_items(5);

        let remaining = drain_with_budget(&queue, "ingest", Duration::from_secs(5)).unwrap();

        assert_eq!(remaining, 0);
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[test]
    fn test_drain_with_budget_empty_queue() {
        let queue = MemoryQueue::new();
        let remaining = drain_with_budget(&queue, "ingest", Duration::from_secs(5)).unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_drain_with_zero_budget_reports_depth() {
        let queue = MemoryQueue::with_items(4);

        let remaining = drain_with_budget(&queue, "ingest", Duration::ZERO).unwrap();

        // Nothing processed, depth re-measured as-is
        assert_eq!(remaining, 4);
    }
}
