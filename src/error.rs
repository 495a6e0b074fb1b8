//! Error types for drainer operations.
//!
//! Crate-wide errors live here; subsystem-specific errors
//! (`QueueError`, `SchedulerError`) live next to the code that
//! produces them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal at startup: no scheduler loop is started
/// when configuration is bad.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("No queues configured: at least one queue name is required")]
    EmptyQueueSet,

    #[error("Worker binary '{0}' does not exist")]
    WorkerBinaryMissing(PathBuf),

    #[error("Worker binary '{0}' is not executable")]
    WorkerBinaryNotExecutable(PathBuf),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors raised by the persisted liveness state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write state file '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
