//! Queue backends for the drain scheduler.
//!
//! A queue is a named backlog of discrete work items, processed one at
//! a time. The actual unit-of-work logic lives behind the
//! `QueueBackend` trait; the scheduler only ever asks for the current
//! depth or for one item to be processed.
//!
//! Two backends ship with the crate:
//!
//! - `SpoolQueue`: a file-spool directory, shared between the
//!   scheduler and its worker subprocesses
//! - `MemoryQueue`: an in-memory backlog for tests and embedding

mod memory;
mod spool;

pub use memory::MemoryQueue;
pub use spool::SpoolQueue;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::DrainerConfig;

/// Errors that can occur while working a queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{0}' is not configured")]
    UnknownQueue(String),

    #[error("Work item '{item}' is malformed: {reason}")]
    MalformedItem { item: String, reason: String },

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of one drain attempt against a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// One item was processed; `remaining` is the depth afterwards.
    Processed { remaining: u64 },
    /// The queue had nothing to hand out.
    Empty,
}

/// A named backlog of work items.
///
/// Implementations must be safe to share across tasks; the scheduler
/// holds them behind `Arc<dyn QueueBackend>`.
pub trait QueueBackend: Send + Sync {
    /// Returns the number of pending items.
    fn depth(&self) -> Result<u64, QueueError>;

    /// Claims and processes at most one item within the given time
    /// budget.
    ///
    /// The budget is a lease, not a deadline enforced here: backends
    /// pass it to whatever does the actual work.
    fn process_one(&self, budget: Duration) -> Result<DrainOutcome, QueueError>;
}

/// Opens a spool backend for every configured queue.
///
/// # Errors
///
/// Returns `QueueError::Io` if a queue's spool directory cannot be
/// created.
pub fn open_backends(
    config: &DrainerConfig,
) -> Result<HashMap<String, Arc<dyn QueueBackend>>, QueueError> {
    let mut backends: HashMap<String, Arc<dyn QueueBackend>> = HashMap::new();
    for name in &config.queues {
        let queue = SpoolQueue::open(config.spool_dir.join(name))?;
        backends.insert(name.clone(), Arc::new(queue));
    }
    Ok(backends)
}

/// Resolves one configured queue by name.
pub fn open_backend(
    config: &DrainerConfig,
    name: &str,
) -> Result<Arc<dyn QueueBackend>, QueueError> {
    if !config.queues.iter().any(|q| q == name) {
        return Err(QueueError::UnknownQueue(name.to_string()));
    }
    let queue = SpoolQueue::open(config.spool_dir.join(name))?;
    Ok(Arc::new(queue))
}
