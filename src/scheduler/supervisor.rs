//! Scheduler supervision.
//!
//! `Supervisor::tick` is the cron-invoked entry point that keeps
//! exactly one scheduler alive: it probes the persisted liveness
//! record and spawns a fresh detached scheduler process when none is
//! running. The probe-then-spawn sequence is best-effort, not a lock;
//! two concurrent ticks can race and briefly start two schedulers.
//! Each instance still enforces its own per-queue concurrency bounds,
//! so the race degrades throughput isolation, not correctness of any
//! single pool.

use std::process::{Command, Stdio};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DrainStrategy, DrainerConfig};
use crate::error::{ConfigError, StateError};
use crate::state::{LivenessRecord, LivenessStore, SchedulerStatus};

/// A heartbeat older than this many heartbeat intervals is reported as
/// stale. The PID probe still decides liveness; staleness is only
/// logged.
const STALE_HEARTBEAT_INTERVALS: u64 = 10;

/// Errors that can occur during a supervisor tick.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Failed to spawn scheduler process: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

/// Outcome of one supervisor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A scheduler was already alive; nothing was done.
    AlreadyRunning { pid: u32 },
    /// A new scheduler was spawned.
    Spawned { pid: u32 },
    /// Draining is disabled in configuration.
    Disabled,
}

/// The cron-driven scheduler supervisor.
pub struct Supervisor {
    config: DrainerConfig,
    liveness: LivenessStore,
}

impl Supervisor {
    /// Creates a supervisor for the given configuration.
    pub fn new(config: DrainerConfig) -> Self {
        let liveness = LivenessStore::new(&config.state_file);
        Self { config, liveness }
    }

    /// One supervision pass: probe, then spawn if needed.
    ///
    /// Never blocks waiting for the spawned scheduler.
    pub fn tick(&self) -> Result<TickOutcome, SupervisorError> {
        if !self.config.enabled {
            debug!("Draining disabled, supervisor is a no-op");
            return Ok(TickOutcome::Disabled);
        }
        self.config.validate()?;

        match self.liveness.load()? {
            Some(record) if record.status == SchedulerStatus::Running => {
                if process_alive(record.pid) {
                    self.check_heartbeat(&record);
                    debug!(pid = record.pid, "Scheduler already running");
                    return Ok(TickOutcome::AlreadyRunning { pid: record.pid });
                }
                warn!(
                    pid = record.pid,
                    "Recorded scheduler is gone without a clean stop, respawning"
                );
            }
            Some(record) => {
                debug!(
                    pid = record.pid,
                    status = ?record.status,
                    "Previous scheduler stopped, respawning"
                );
            }
            None => {
                debug!("No liveness record, starting first scheduler");
            }
        }

        let pid = self.spawn_scheduler()?;
        self.liveness.write(&LivenessRecord::running(pid))?;
        info!(pid, "Spawned scheduler");
        Ok(TickOutcome::Spawned { pid })
    }

    /// Spawns a detached scheduler process and returns its PID.
    fn spawn_scheduler(&self) -> Result<u32, SupervisorError> {
        let mut command = Command::new(&self.config.worker_binary_path);
        command
            .arg(scheduler_subcommand(self.config.drain_strategy))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(path) = &self.config.config_path {
            command.arg(format!("--config={}", path.display()));
        }

        // Spawn and walk away: the child outlives this process.
        let child = command.spawn()?;
        Ok(child.id())
    }

    fn check_heartbeat(&self, record: &LivenessRecord) {
        let stale_after = chrono::Duration::seconds(
            (self.config.heartbeat_interval_secs * STALE_HEARTBEAT_INTERVALS) as i64,
        );
        let age = chrono::Utc::now() - record.heartbeat;
        if age > stale_after {
            // The probe says alive, so alive wins; a wedged scheduler
            // that stops heartbeating but keeps its process is left
            // for the operator.
            warn!(
                pid = record.pid,
                heartbeat_age_secs = age.num_seconds(),
                "Scheduler process is alive but its heartbeat is stale"
            );
        }
    }
}

/// Maps the configured drain strategy onto the scheduler subcommand
/// the supervisor launches.
fn scheduler_subcommand(strategy: DrainStrategy) -> &'static str {
    match strategy {
        DrainStrategy::Subprocess => "run-multi-queue-scheduler",
        DrainStrategy::InProcess => "run-single-queue-tick",
    }
}

/// Signal-0 existence probe: checks the process without touching it.
fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
