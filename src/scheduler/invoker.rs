//! Worker subprocess invocation.
//!
//! Builds and spawns the command that drains exactly one item from one
//! queue:
//!
//! ```text
//! <worker-binary> drain-one-queue-item --uri=<base-url> [--config=<path>] <queue>
//! ```
//!
//! The parent only ever reads one thing back: a single decimal
//! remaining-depth line on stdout, plus the exit code. That protocol is
//! the whole IPC contract with the child.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::DrainerConfig;
use crate::error::ConfigError;

/// Builder for worker subprocess commands.
#[derive(Debug, Clone)]
pub struct WorkerInvoker {
    binary: PathBuf,
    base_url: String,
    config_path: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl WorkerInvoker {
    /// Creates an invoker from configuration, validating the worker
    /// binary once up front. An invalid path is a fatal configuration
    /// error, not a runtime retry.
    pub fn from_config(config: &DrainerConfig) -> Result<Self, ConfigError> {
        config.validate_worker_binary()?;

        Ok(Self {
            binary: config.worker_binary_path.clone(),
            base_url: config.base_url.clone(),
            config_path: config.config_path.clone(),
            env: config.worker_env().into_iter().collect(),
        })
    }

    /// Returns the argument vector for draining one item of `queue`.
    pub fn args(&self, queue: &str) -> Vec<String> {
        let mut args = vec![
            "drain-one-queue-item".to_string(),
            format!("--uri={}", self.base_url),
        ];
        if let Some(path) = &self.config_path {
            args.push(format!("--config={}", path.display()));
        }
        args.push(queue.to_string());
        args
    }

    /// Spawns a worker for `queue` with piped stdin/stdout.
    ///
    /// stdin stays piped so the soft timeout can close it; stderr is
    /// inherited so worker diagnostics land in the scheduler's log
    /// stream.
    pub fn spawn(&self, queue: &str) -> std::io::Result<Child> {
        let args = self.args(queue);
        debug!(binary = %self.binary.display(), ?args, "Spawning worker");

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        for (key, value) in &self.env {
            command.env(key, value);
        }

        command.spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrainerConfig;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn executable_stub(temp: &TempDir) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = temp.path().join("worker");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_args_shape() {
        let temp = TempDir::new().unwrap();
        let mut config = DrainerConfig::default()
            .with_worker_binary(executable_stub(&temp));
        config.base_url = "https://example.org".to_string();
        config.config_path = Some(PathBuf::from("/etc/drainer.json"));

        let invoker = WorkerInvoker::from_config(&config).unwrap();
        let args = invoker.args("ingest");

        assert_eq!(
            args,
            vec![
                "drain-one-queue-item",
                "--uri=https://example.org",
                "--config=/etc/drainer.json",
                "ingest",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_args_without_config_path() {
        let temp = TempDir::new().unwrap();
        let config = DrainerConfig::default().with_worker_binary(executable_stub(&temp));

        let invoker = WorkerInvoker::from_config(&config).unwrap();
        let args = invoker.args("ingest");

        assert!(!args.iter().any(|a| a.starts_with("--config")));
        assert_eq!(args.last().map(String::as_str), Some("ingest"));
    }

    #[test]
    fn test_invalid_binary_is_fatal() {
        let config = DrainerConfig::default().with_worker_binary("/nonexistent/worker");
        assert!(WorkerInvoker::from_config(&config).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_home_override_in_env() {
        let temp = TempDir::new().unwrap();
        let mut config = DrainerConfig::default().with_worker_binary(executable_stub(&temp));
        config.home_dir = Some(PathBuf::from("/var/lib/drainer"));

        let invoker = WorkerInvoker::from_config(&config).unwrap();
        assert!(invoker
            .env
            .iter()
            .any(|(k, v)| k == "HOME" && v == "/var/lib/drainer"));
    }
}
