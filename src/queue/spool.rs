//! File-spool queue backend.
//!
//! Each queue is a directory; each pending item is one JSON file named
//! `<millis>-<uuid>.json` so lexicographic order approximates FIFO.
//! Claiming renames the file to a `.claimed` suffix, which is atomic
//! on POSIX filesystems and therefore safe across the scheduler and
//! its worker subprocesses sharing one spool. A claim whose worker
//! died before removing the file is reclaimed after a grace period,
//! so no item is lost to a crash.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DrainOutcome, QueueBackend, QueueError};

/// Suffix of pending item files. Claimed items are renamed to
/// `.claimed` and stop counting as pending.
const ITEM_SUFFIX: &str = ".json";

/// Suffix of claimed item files.
const CLAIMED_SUFFIX: &str = ".claimed";

/// Claimed items older than this are assumed orphaned by a dead
/// worker and put back into the pending set.
const DEFAULT_STALE_CLAIM_AGE: Duration = Duration::from_secs(900);

/// A directory-backed work queue shared between processes.
pub struct SpoolQueue {
    dir: PathBuf,
    stale_claim_age: Duration,
}

impl SpoolQueue {
    /// Opens a spool queue, creating its directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            stale_claim_age: DEFAULT_STALE_CLAIM_AGE,
        })
    }

    /// Overrides how long a claimed item may sit before it is treated
    /// as orphaned.
    pub fn with_stale_claim_age(mut self, age: Duration) -> Self {
        self.stale_claim_age = age;
        self
    }

    /// Returns the spool directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Enqueues one item.
    pub fn push(&self, payload: &serde_json::Value) -> Result<(), QueueError> {
        let name = format!("{}-{}{}", Utc::now().timestamp_millis(), Uuid::new_v4(), ITEM_SUFFIX);
        let path = self.dir.join(name);
        std::fs::write(&path, serde_json::to_vec(payload)?)?;
        Ok(())
    }

    /// Lists pending item files in FIFO-ish order. Orphaned claims are
    /// folded back into the pending set on the way.
    fn pending(&self) -> Result<Vec<PathBuf>, QueueError> {
        let mut items = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(ITEM_SUFFIX) {
                items.push(path);
            } else if name.ends_with(CLAIMED_SUFFIX) {
                if let Some(reclaimed) = self.reclaim_if_stale(&entry)? {
                    items.push(reclaimed);
                }
            }
        }
        items.sort();
        Ok(items)
    }

    /// Puts a claimed item back into the pending set once its claim
    /// has outlived the grace period.
    fn reclaim_if_stale(
        &self,
        entry: &std::fs::DirEntry,
    ) -> Result<Option<PathBuf>, QueueError> {
        let modified = entry.metadata()?.modified()?;
        let age = modified.elapsed().unwrap_or_default();
        if age < self.stale_claim_age {
            return Ok(None);
        }

        let path = entry.path();
        let pending = path.with_extension("json");
        match std::fs::rename(&path, &pending) {
            Ok(()) => {
                warn!(
                    item = %pending.display(),
                    age_secs = age.as_secs(),
                    "Reclaimed orphaned claim"
                );
                Ok(Some(pending))
            }
            // The claiming worker finished (or another handle
            // reclaimed it) in the meantime.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Claims the oldest pending item by renaming it.
    ///
    /// Returns `None` when the queue is empty. A rename that fails
    /// because another worker claimed the file first is not an error;
    /// the next candidate is tried.
    fn claim(&self) -> Result<Option<PathBuf>, QueueError> {
        for path in self.pending()? {
            let claimed = path.with_extension("claimed");
            match std::fs::rename(&path, &claimed) {
                Ok(()) => {
                    // The stale-claim clock runs off mtime; restart it
                    // at claim time, not enqueue time.
                    let file = std::fs::File::options().write(true).open(&claimed)?;
                    file.set_modified(std::time::SystemTime::now())?;
                    return Ok(Some(claimed));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(item = %path.display(), "Item claimed by another worker, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

impl QueueBackend for SpoolQueue {
    fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.pending()?.len() as u64)
    }

    fn process_one(&self, _budget: Duration) -> Result<DrainOutcome, QueueError> {
        let Some(claimed) = self.claim()? else {
            return Ok(DrainOutcome::Empty);
        };

        // The payload must at least be valid JSON; the real unit of
        // work is delegated to whatever consumes the item downstream.
        let content = std::fs::read(&claimed)?;
        if let Err(e) = serde_json::from_slice::<serde_json::Value>(&content) {
            warn!(item = %claimed.display(), error = %e, "Dropping malformed work item");
            std::fs::remove_file(&claimed)?;
            return Err(QueueError::MalformedItem {
                item: claimed.display().to_string(),
                reason: e.to_string(),
            });
        }

        std::fs::remove_file(&claimed)?;
        let remaining = self.depth()?;
        Ok(DrainOutcome::Processed { remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_queue(temp: &TempDir) -> SpoolQueue {
        SpoolQueue::open(temp.path().join("ingest")).unwrap()
    }

    #[test]
    fn test_empty_queue() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp);

        assert_eq!(queue.depth().unwrap(), 0);
        assert_eq!(
            queue.process_one(Duration::from_secs(1)).unwrap(),
            DrainOutcome::Empty
        );
    }

    #[test]
    fn test_push_and_drain() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp);

        queue.push(&json!({"entity": 1})).unwrap();
        queue.push(&json!({"entity": 2})).unwrap();
        queue.push(&json!({"entity": 3})).unwrap();
        assert_eq!(queue.depth().unwrap(), 3);

        let outcome = queue.process_one(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, DrainOutcome::Processed { remaining: 2 });

        let outcome = queue.process_one(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, DrainOutcome::Processed { remaining: 1 });
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[test]
    fn test_claimed_items_not_counted() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp);

        queue.push(&json!({"entity": 1})).unwrap();
        let claimed = queue.claim().unwrap().unwrap();
        assert!(claimed.exists());

        // A claimed item no longer counts as pending
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[test]
    fn test_stale_claim_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let queue = SpoolQueue::open(temp.path().join("ingest"))
            .unwrap()
            .with_stale_claim_age(Duration::ZERO);

        queue.push(&json!({"entity": 1})).unwrap();
        let claimed = queue.claim().unwrap().unwrap();
        assert!(claimed.exists());

        // Any depth measurement folds the orphaned claim back in.
        assert_eq!(queue.depth().unwrap(), 1);
        assert!(!claimed.exists());
        assert_eq!(
            queue.process_one(Duration::from_secs(1)).unwrap(),
            DrainOutcome::Processed { remaining: 0 }
        );
    }

    #[test]
    fn test_malformed_item_is_dropped() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp);

        std::fs::write(queue.dir().join("000-bad.json"), "{not json").unwrap();
        assert_eq!(queue.depth().unwrap(), 1);

        let err = queue.process_one(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, QueueError::MalformedItem { .. }));
        // Dropped, not retried forever
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[test]
    fn test_two_handles_share_one_backlog() {
        let temp = TempDir::new().unwrap();
        let producer = open_queue(&temp);
        let consumer = open_queue(&temp);

        producer.push(&json!({"entity": 7})).unwrap();
        assert_eq!(consumer.depth().unwrap(), 1);
        assert_eq!(
            consumer.process_one(Duration::from_secs(1)).unwrap(),
            DrainOutcome::Processed { remaining: 0 }
        );
        assert_eq!(producer.depth().unwrap(), 0);
    }
}
