//! CLI command definitions for drainer.
//!
//! Four operational entry points plus a status probe. The
//! `drain-one-queue-item` command is what scheduler-spawned worker
//! subprocesses execute; its stdout carries nothing but the remaining
//! depth, which is why all logging goes to stderr.

use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::config::{DrainStrategy, DrainerConfig};
use crate::queue;
use crate::scheduler::{drain_one_item, Scheduler, Supervisor, TickOutcome};
use crate::state::{LivenessRecord, LivenessStore};

/// Default config file path.
const DEFAULT_CONFIG: &str = "./drainer.json";

/// Background queue-drain scheduler.
#[derive(Parser)]
#[command(name = "drainer")]
#[command(about = "Drain work queues with bounded pools of worker subprocesses")]
#[command(version)]
#[command(
    long_about = "drainer keeps a single background scheduler alive that periodically \
measures each configured queue and drains it with short-lived worker subprocesses.\n\n\
Typical wiring:\n  * * * * *  drainer supervise --config /etc/drainer.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG, global = true)]
    pub config: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Ensure one scheduler is running; spawn a detached one if not.
    ///
    /// This is the cron-invoked entry point. It probes the persisted
    /// PID and heartbeat, never blocks on the spawned scheduler, and
    /// exits immediately.
    #[command(alias = "cron")]
    Supervise,

    /// Run the scheduler loop with worker subprocess pools.
    RunMultiQueueScheduler,

    /// Run the scheduler loop draining queues synchronously in-process.
    RunSingleQueueTick,

    /// Process exactly one item from one queue and print the
    /// remaining depth.
    ///
    /// Prints a single base-10 integer on stdout and exits 0; that
    /// line plus the exit code is the whole contract with the parent
    /// scheduler.
    DrainOneQueueItem(DrainOneArgs),

    /// Print the persisted scheduler liveness record as JSON.
    Status,
}

/// Arguments for `drainer drain-one-queue-item`.
#[derive(Parser, Debug)]
pub struct DrainOneArgs {
    /// Name of the queue to drain from.
    pub queue: String,

    /// Base URL override for the unit of work.
    #[arg(long)]
    pub uri: Option<String>,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the command selected by the parsed CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = DrainerConfig::load(&cli.config)?;

    match cli.command {
        Commands::Supervise => run_supervise(config),
        Commands::RunMultiQueueScheduler => {
            run_scheduler(config, DrainStrategy::Subprocess).await
        }
        Commands::RunSingleQueueTick => run_scheduler(config, DrainStrategy::InProcess).await,
        Commands::DrainOneQueueItem(args) => {
            if let Some(uri) = args.uri {
                config.base_url = uri;
            }
            run_drain_one(config, &args.queue).await
        }
        Commands::Status => run_status(config),
    }
}

fn run_supervise(config: DrainerConfig) -> anyhow::Result<()> {
    let outcome = Supervisor::new(config).tick()?;
    match outcome {
        TickOutcome::AlreadyRunning { pid } => {
            info!(pid, "Scheduler already running, nothing to do");
        }
        TickOutcome::Spawned { pid } => {
            info!(pid, "Started new scheduler");
        }
        TickOutcome::Disabled => {
            info!("Queue draining is disabled");
        }
    }
    Ok(())
}

async fn run_scheduler(
    mut config: DrainerConfig,
    strategy: DrainStrategy,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("Queue draining is disabled, exiting");
        return Ok(());
    }
    config.drain_strategy = strategy;

    let backends = queue::open_backends(&config)?;
    let scheduler = Scheduler::new(config, backends)?;
    let reason = scheduler.run().await?;

    info!(?reason, "Scheduler run complete");
    Ok(())
}

async fn run_drain_one(config: DrainerConfig, queue_name: &str) -> anyhow::Result<()> {
    let backend = queue::open_backend(&config, queue_name)?;
    let remaining = drain_one_item(backend, queue_name, config.per_child_timeout()).await?;

    // The sole stdout line; the parent parses exactly this.
    println!("{remaining}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    state_file: String,
    record: Option<LivenessRecord>,
}

fn run_status(config: DrainerConfig) -> anyhow::Result<()> {
    let store = LivenessStore::new(&config.state_file);
    let output = StatusOutput {
        state_file: config.state_file.display().to_string(),
        record: store.load()?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_drain_one_queue_item() {
        let cli = Cli::try_parse_from([
            "drainer",
            "drain-one-queue-item",
            "--uri=https://example.org",
            "--config=/etc/drainer.json",
            "ingest",
        ])
        .unwrap();

        assert_eq!(cli.config, "/etc/drainer.json");
        let Commands::DrainOneQueueItem(args) = cli.command else {
            panic!("expected drain-one-queue-item");
        };
        assert_eq!(args.queue, "ingest");
        assert_eq!(args.uri.as_deref(), Some("https://example.org"));
    }

    #[test]
    fn test_parse_scheduler_commands() {
        let cli = Cli::try_parse_from(["drainer", "run-multi-queue-scheduler"]).unwrap();
        assert!(matches!(cli.command, Commands::RunMultiQueueScheduler));

        let cli = Cli::try_parse_from(["drainer", "run-single-queue-tick"]).unwrap();
        assert!(matches!(cli.command, Commands::RunSingleQueueTick));

        let cli = Cli::try_parse_from(["drainer", "cron"]).unwrap();
        assert!(matches!(cli.command, Commands::Supervise));
    }
}
