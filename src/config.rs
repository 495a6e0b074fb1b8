//! Configuration for the drain scheduler.
//!
//! Configuration is loaded from a JSON file and validated once at
//! startup. Every tunable has a serde default so a minimal config only
//! needs to name its queues and the spool directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default maximum number of concurrently running workers per queue.
const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Default per-child soft timeout in seconds.
const DEFAULT_CHILD_TIMEOUT_SECS: u64 = 30;

/// Default number of consecutive idle cycles before shutdown.
const DEFAULT_IDLE_CYCLES: u32 = 3;

/// How a queue tick drains work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStrategy {
    /// Drain items synchronously in-process, up to a time budget per
    /// tick. Implicit concurrency bound of 1.
    InProcess,
    /// Spawn worker subprocesses, at most one per tick, bounded by
    /// `max_concurrent_per_queue`.
    Subprocess,
}

/// Configuration for the drain scheduler and its entry points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainerConfig {
    /// Master switch. When false, supervise/scheduler commands exit
    /// immediately without starting anything.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Names of the logical queues to drain.
    #[serde(default)]
    pub queues: Vec<String>,

    /// Root directory of the file-spool queues. Each queue is a
    /// subdirectory holding one JSON file per pending item.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    /// Path to the binary invoked for worker subprocesses. Usually the
    /// drainer binary itself.
    #[serde(default = "default_worker_binary")]
    pub worker_binary_path: PathBuf,

    /// Base URL forwarded to worker subprocesses as `--uri`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional HOME override for worker subprocesses.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,

    /// Maximum concurrently running workers per queue.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_queue: usize,

    /// Soft timeout for a single worker subprocess, in seconds. On
    /// expiry the child's stdin is closed; the child is never killed.
    #[serde(default = "default_child_timeout")]
    pub per_child_timeout_secs: u64,

    /// Consecutive empty-and-idle cycles a queue must accumulate
    /// before it counts as drained.
    #[serde(default = "default_idle_cycles")]
    pub idle_cycles_before_shutdown: u32,

    /// Seconds between global idle checks.
    #[serde(default = "default_idle_check_interval")]
    pub idle_check_interval_secs: u64,

    /// Hard time-to-live for one scheduler run, in seconds. 0 disables
    /// the expiration timer.
    #[serde(default)]
    pub ttl_secs: u64,

    /// Seconds between heartbeat writes.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds between per-queue ticks.
    #[serde(default = "default_tick_interval")]
    pub queue_tick_interval_secs: u64,

    /// Time budget for one in-process drain tick, in seconds.
    #[serde(default = "default_in_process_budget")]
    pub in_process_budget_secs: u64,

    /// Path of the persisted liveness record.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Drain strategy used by the scheduler loop.
    #[serde(default = "default_strategy")]
    pub drain_strategy: DrainStrategy,

    /// Path this config was loaded from, forwarded to worker
    /// subprocesses so they resolve the same spool.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("./spool")
}

fn default_worker_binary() -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| PathBuf::from("drainer"))
}

fn default_base_url() -> String {
    "http://localhost".to_string()
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_child_timeout() -> u64 {
    DEFAULT_CHILD_TIMEOUT_SECS
}

fn default_idle_cycles() -> u32 {
    DEFAULT_IDLE_CYCLES
}

fn default_idle_check_interval() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    3
}

fn default_tick_interval() -> u64 {
    1
}

fn default_in_process_budget() -> u64 {
    60
}

fn default_state_file() -> PathBuf {
    PathBuf::from("./drainer-state.json")
}

fn default_strategy() -> DrainStrategy {
    DrainStrategy::Subprocess
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            queues: Vec::new(),
            spool_dir: default_spool_dir(),
            worker_binary_path: default_worker_binary(),
            base_url: default_base_url(),
            home_dir: None,
            max_concurrent_per_queue: default_max_concurrent(),
            per_child_timeout_secs: default_child_timeout(),
            idle_cycles_before_shutdown: default_idle_cycles(),
            idle_check_interval_secs: default_idle_check_interval(),
            ttl_secs: 0,
            heartbeat_interval_secs: default_heartbeat_interval(),
            queue_tick_interval_secs: default_tick_interval(),
            in_process_budget_secs: default_in_process_budget(),
            state_file: default_state_file(),
            drain_strategy: default_strategy(),
            config_path: None,
        }
    }
}

impl DrainerConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validates the configuration for scheduler use.
    ///
    /// Checks the queue set and, in subprocess mode, that the worker
    /// binary exists and is executable. All failures here are fatal:
    /// no scheduler loop is started on a bad config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::EmptyQueueSet);
        }

        if self.max_concurrent_per_queue == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_per_queue".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.idle_check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "idle_check_interval_secs".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }

        if self.drain_strategy == DrainStrategy::Subprocess {
            self.validate_worker_binary()?;
        }

        Ok(())
    }

    /// Checks that the configured worker binary exists and carries an
    /// executable bit.
    pub fn validate_worker_binary(&self) -> Result<(), ConfigError> {
        let path = &self.worker_binary_path;
        let metadata = std::fs::metadata(path)
            .map_err(|_| ConfigError::WorkerBinaryMissing(path.clone()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(ConfigError::WorkerBinaryNotExecutable(path.clone()));
            }
        }

        #[cfg(not(unix))]
        let _ = metadata;

        Ok(())
    }

    /// Sets the queue names.
    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    /// Sets the spool directory.
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = dir.into();
        self
    }

    /// Sets the worker binary path.
    pub fn with_worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary_path = path.into();
        self
    }

    /// Sets the state file path.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    /// Sets the drain strategy.
    pub fn with_drain_strategy(mut self, strategy: DrainStrategy) -> Self {
        self.drain_strategy = strategy;
        self
    }

    /// Sets the per-queue concurrency bound.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_per_queue = max;
        self
    }

    /// Sets the idle cycle threshold.
    pub fn with_idle_cycles(mut self, cycles: u32) -> Self {
        self.idle_cycles_before_shutdown = cycles;
        self
    }

    /// Sets the hard TTL in seconds (0 disables it).
    pub fn with_ttl_secs(mut self, secs: u64) -> Self {
        self.ttl_secs = secs;
        self
    }

    /// Returns the heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Returns the per-queue tick interval.
    pub fn queue_tick_interval(&self) -> Duration {
        Duration::from_secs(self.queue_tick_interval_secs)
    }

    /// Returns the idle check interval.
    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    /// Returns the per-child soft timeout.
    pub fn per_child_timeout(&self) -> Duration {
        Duration::from_secs(self.per_child_timeout_secs)
    }

    /// Returns the in-process drain budget.
    pub fn in_process_budget(&self) -> Duration {
        Duration::from_secs(self.in_process_budget_secs)
    }

    /// Returns the hard TTL, or `None` when disabled.
    pub fn ttl(&self) -> Option<Duration> {
        if self.ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.ttl_secs))
        }
    }

    /// Returns environment overrides for worker subprocesses.
    pub fn worker_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Some(home) = &self.home_dir {
            env.insert("HOME".to_string(), home.display().to_string());
        }
        env
    }
}
