//! Persisted scheduler liveness state.
//!
//! The liveness record is the only durable state shared across
//! scheduler runs. The supervisor reads it to decide whether a
//! scheduler is already alive; the scheduler writes it on every
//! heartbeat and once more at clean shutdown.
//!
//! The record is a tagged value rather than a bare signed PID: the
//! status field says what the PID means, instead of encoding
//! "stopped" as a negated process id.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StateError;

/// What the recorded PID currently stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    /// A scheduler with this PID was alive at the recorded heartbeat.
    Running,
    /// The scheduler with this PID shut down cleanly.
    StoppedCleanly,
    /// The record could not be interpreted; treat the PID as stale.
    Unknown,
}

/// The persisted liveness record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessRecord {
    /// OS process id of the most recent scheduler.
    pub pid: u32,
    /// What that PID means.
    pub status: SchedulerStatus,
    /// Last heartbeat written by a live scheduler.
    pub heartbeat: DateTime<Utc>,
}

impl LivenessRecord {
    /// Builds a fresh `Running` record for the given PID.
    pub fn running(pid: u32) -> Self {
        Self {
            pid,
            status: SchedulerStatus::Running,
            heartbeat: Utc::now(),
        }
    }
}

/// File-backed store for the liveness record.
///
/// Writes go through a temp file in the same directory followed by a
/// rename, so readers never observe a half-written record.
pub struct LivenessStore {
    path: PathBuf,
}

impl LivenessStore {
    /// Creates a store at the given path. The file itself is created
    /// lazily on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the store's file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the current record.
    ///
    /// A missing file yields `Ok(None)`. A file that exists but does
    /// not parse yields a record with `SchedulerStatus::Unknown` so a
    /// corrupt state file never wedges the supervisor.
    pub fn load(&self) -> Result<Option<LivenessRecord>, StateError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::ReadFailed {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Liveness record unparseable, treating as unknown");
                Ok(Some(LivenessRecord {
                    pid: 0,
                    status: SchedulerStatus::Unknown,
                    heartbeat: DateTime::<Utc>::MIN_UTC,
                }))
            }
        }
    }

    /// Writes a record atomically.
    pub fn write(&self, record: &LivenessRecord) -> Result<(), StateError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| StateError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })?;

        let json = serde_json::to_string_pretty(record)?;
        let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StateError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })?;
        std::fs::write(temp.path(), json).map_err(|e| StateError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })?;
        temp.persist(&self.path)
            .map_err(|e| StateError::WriteFailed {
                path: self.path.clone(),
                source: e.error,
            })?;

        Ok(())
    }

    /// Refreshes the heartbeat for a running scheduler.
    pub fn touch_heartbeat(&self, pid: u32) -> Result<(), StateError> {
        self.write(&LivenessRecord::running(pid))
    }

    /// Marks the given scheduler as cleanly stopped, preserving its
    /// PID for observability.
    pub fn mark_stopped(&self, pid: u32) -> Result<(), StateError> {
        self.write(&LivenessRecord {
            pid,
            status: SchedulerStatus::StoppedCleanly,
            heartbeat: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> LivenessStore {
        LivenessStore::new(temp.path().join("state.json"))
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        assert_eq!(store(&temp).load().unwrap(), None);
    }

    #[test]
    fn test_write_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let record = LivenessRecord::running(4821);
        store.write(&record).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.pid, 4821);
        assert_eq!(loaded.status, SchedulerStatus::Running);
    }

    #[test]
    fn test_mark_stopped_preserves_pid() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.touch_heartbeat(4821).unwrap();
        store.mark_stopped(4821).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.pid, 4821);
        assert_eq!(loaded.status, SchedulerStatus::StoppedCleanly);
    }

    #[test]
    fn test_corrupt_record_reads_as_unknown() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        std::fs::write(store.path(), "{garbage").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.status, SchedulerStatus::Unknown);
    }

    #[test]
    fn test_overwrite_is_atomic_replacement() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.touch_heartbeat(100).unwrap();
        store.touch_heartbeat(200).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.pid, 200);
    }
}
