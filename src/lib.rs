//! drainer: self-supervising background queue-drain scheduler.
//!
//! A long-lived scheduler process periodically wakes up, measures the
//! depth of each configured work queue, and drains them with bounded
//! pools of short-lived worker subprocesses, while a cron-driven
//! supervisor keeps exactly one scheduler alive.

pub mod cli;
pub mod config;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use config::{DrainStrategy, DrainerConfig};
pub use error::{ConfigError, StateError};
pub use scheduler::{Scheduler, StopReason, Supervisor, TickOutcome};
pub use state::{LivenessRecord, LivenessStore, SchedulerStatus};
