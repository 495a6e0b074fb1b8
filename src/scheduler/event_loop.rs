//! The scheduler event loop.
//!
//! A single cooperative task owns all scheduler state and multiplexes
//! four timer sources plus child exit events:
//!
//! - heartbeat (default 3s): refresh the persisted liveness record
//! - per-queue ticks (default 1s, one independent timer per queue):
//!   drain or spawn, bounded bookkeeping only
//! - idle check (default 60s): stop once every queue has been idle
//!   long enough
//! - optional TTL: unconditional stop, a safety valve against runs
//!   that never go idle
//!
//! True parallelism comes only from worker subprocesses. Each child
//! gets a detached supervision task that forwards stdout depth lines,
//! soft-timeout, and exit through a channel back to the loop; all
//! record mutation happens on the loop task, so no locks are needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DrainStrategy, DrainerConfig};
use crate::error::{ConfigError, StateError};
use crate::queue::{QueueBackend, QueueError};
use crate::state::LivenessStore;

use super::idle::IdleTracker;
use super::invoker::WorkerInvoker;
use super::pool::{ChildRecord, QueuePool, SpawnDecision};
use super::single::drain_with_budget;

/// Fallback TTL when none is configured; effectively "never".
const TTL_DISABLED: Duration = Duration::from_secs(u32::MAX as u64);

/// Errors that can occur while building or running the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Why the loop stopped. Only these two paths terminate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every queue counted down to zero idle cycles.
    AllIdle,
    /// The hard TTL expired regardless of idle state.
    TtlExpired,
}

/// Events a child supervision task sends back to the loop.
#[derive(Debug)]
pub enum ChildEvent {
    /// The worker printed a remaining-depth line on stdout.
    Depth { queue: String, pid: u32, depth: u64 },
    /// The soft timeout fired; stdin has been closed.
    TimedOut { queue: String, pid: u32 },
    /// The worker process exited.
    Exited {
        queue: String,
        pid: u32,
        exit_code: i32,
    },
}

/// The queue-draining scheduler.
pub struct Scheduler {
    config: DrainerConfig,
    backends: HashMap<String, Arc<dyn QueueBackend>>,
    pools: HashMap<String, QueuePool>,
    idle: IdleTracker,
    liveness: LivenessStore,
    invoker: Option<WorkerInvoker>,
    events_tx: mpsc::UnboundedSender<ChildEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ChildEvent>>,
    run_id: Uuid,
}

impl Scheduler {
    /// Builds a scheduler over the given queue backends.
    ///
    /// Validates configuration up front; in subprocess mode this
    /// includes the worker binary check, so a bad binary path fails
    /// here instead of on the first tick.
    pub fn new(
        config: DrainerConfig,
        backends: HashMap<String, Arc<dyn QueueBackend>>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let invoker = match config.drain_strategy {
            DrainStrategy::Subprocess => Some(WorkerInvoker::from_config(&config)?),
            DrainStrategy::InProcess => None,
        };

        let pools = config
            .queues
            .iter()
            .map(|q| (q.clone(), QueuePool::new()))
            .collect();
        let idle = IdleTracker::new(
            config.queues.iter().cloned(),
            config.idle_cycles_before_shutdown,
        );
        let liveness = LivenessStore::new(&config.state_file);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            backends,
            pools,
            idle,
            liveness,
            invoker,
            events_tx,
            events_rx: Some(events_rx),
            run_id: Uuid::new_v4(),
        })
    }

    /// Runs the loop to completion.
    ///
    /// Returns why it stopped. Individual queue or child failures are
    /// logged and never propagate out of the loop; only a failed
    /// shutdown state write surfaces as an error.
    pub async fn run(mut self) -> Result<StopReason, SchedulerError> {
        let pid = std::process::id();
        info!(
            run_id = %self.run_id,
            pid,
            queues = ?self.config.queues,
            strategy = ?self.config.drain_strategy,
            ttl_secs = self.config.ttl_secs,
            "Scheduler starting"
        );

        let mut events_rx = self
            .events_rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        let mut idle_check = tokio::time::interval(self.config.idle_check_interval());
        // The first interval tick completes immediately; an immediate
        // idle check is harmless because counters start at threshold.
        let mut ticks: StreamMap<String, IntervalStream> = StreamMap::new();
        for queue in &self.config.queues {
            ticks.insert(
                queue.clone(),
                IntervalStream::new(tokio::time::interval(self.config.queue_tick_interval())),
            );
        }

        let ttl = self.config.ttl();
        let ttl_sleep = tokio::time::sleep(ttl.unwrap_or(TTL_DISABLED));
        tokio::pin!(ttl_sleep);

        let reason = loop {
            tokio::select! {
                _ = heartbeat.tick() => self.write_heartbeat(pid),
                Some((queue, _)) = ticks.next() => self.on_queue_tick(&queue),
                _ = idle_check.tick() => {
                    if self.idle.all_idle() {
                        break StopReason::AllIdle;
                    }
                    debug!(run_id = %self.run_id, "Idle check: queues still active");
                }
                () = &mut ttl_sleep, if ttl.is_some() => {
                    warn!(run_id = %self.run_id, ttl_secs = self.config.ttl_secs, "TTL expired, forcing shutdown");
                    break StopReason::TtlExpired;
                }
                Some(event) = events_rx.recv() => self.on_child_event(event),
            }
        };

        self.shutdown(pid, reason)?;
        Ok(reason)
    }

    /// One tick for one queue. Never blocks the loop in subprocess
    /// mode; in-process mode blocks by design (legacy single-child
    /// strategy).
    fn on_queue_tick(&mut self, queue: &str) {
        let Some(backend) = self.backends.get(queue).map(Arc::clone) else {
            return;
        };

        match self.config.drain_strategy {
            DrainStrategy::InProcess => self.tick_in_process(queue, backend.as_ref()),
            DrainStrategy::Subprocess => self.tick_subprocess(queue, backend.as_ref()),
        }
    }

    fn tick_in_process(&mut self, queue: &str, backend: &dyn QueueBackend) {
        match drain_with_budget(backend, queue, self.config.in_process_budget()) {
            Ok(0) => self.idle.decrement(queue),
            Ok(_) => self.idle.reset(queue),
            Err(e) => {
                // A failing queue is not idle; keep it alive and retry
                // next tick.
                warn!(queue, error = %e, "In-process drain failed");
                self.idle.reset(queue);
            }
        }
    }

    fn tick_subprocess(&mut self, queue: &str, backend: &dyn QueueBackend) {
        let running = self
            .pools
            .get(queue)
            .map(QueuePool::running_count)
            .unwrap_or(0);

        let depth = match backend.depth() {
            Ok(depth) => depth,
            Err(e) => {
                warn!(queue, error = %e, "Failed to measure queue depth, skipping tick");
                return;
            }
        };

        match SpawnDecision::decide(running, depth, self.config.max_concurrent_per_queue) {
            SpawnDecision::Spawn => {
                // Activity observed; the counter resets even if the
                // spawn itself fails, the next tick retries anyway.
                self.idle.reset(queue);
                self.spawn_child(queue);
            }
            SpawnDecision::Idle => {
                self.idle.decrement(queue);
                debug!(
                    queue,
                    countdown = self.idle.counter(queue),
                    "Queue empty and idle"
                );
            }
            SpawnDecision::Saturated => {
                debug!(queue, running, depth, "Concurrency bound reached, skipping spawn");
            }
            SpawnDecision::HasWorkInFlight => {
                debug!(queue, running, "Queue empty but children still running");
            }
        }
    }

    fn spawn_child(&mut self, queue: &str) {
        let Some(invoker) = &self.invoker else {
            return;
        };

        let child = match invoker.spawn(queue) {
            Ok(child) => child,
            Err(e) => {
                // Slot stays unfilled; running_count is unaffected so
                // the next tick retries naturally.
                error!(queue, error = %e, "Failed to spawn worker");
                return;
            }
        };

        let pid = child.id().unwrap_or(0);
        info!(queue, pid, "Spawned worker");

        if let Some(pool) = self.pools.get_mut(queue) {
            pool.insert(ChildRecord::spawned(pid, queue));
        }

        tokio::spawn(supervise_child(
            child,
            queue.to_string(),
            pid,
            self.config.per_child_timeout(),
            self.events_tx.clone(),
        ));
    }

    fn on_child_event(&mut self, event: ChildEvent) {
        match event {
            ChildEvent::Depth { queue, pid, depth } => {
                debug!(queue, pid, depth, "Worker reported remaining depth");
                if let Some(pool) = self.pools.get_mut(&queue) {
                    pool.record_depth(pid, depth);
                }
            }
            ChildEvent::TimedOut { queue, pid } => {
                warn!(queue, pid, "Worker exceeded soft timeout, stdin closed");
                if let Some(pool) = self.pools.get_mut(&queue) {
                    pool.mark_timed_out(pid);
                }
            }
            ChildEvent::Exited {
                queue,
                pid,
                exit_code,
            } => {
                let Some(pool) = self.pools.get_mut(&queue) else {
                    return;
                };
                let Some(record) = pool.mark_exit(pid, exit_code) else {
                    return;
                };

                let elapsed_ms = record.elapsed().num_milliseconds();
                if exit_code == 0 && !record.timed_out {
                    info!(
                        queue,
                        pid,
                        exit_code,
                        elapsed_ms,
                        reported_depth = record.reported_depth,
                        timed_out = record.timed_out,
                        "Worker finished"
                    );
                } else {
                    // Reported depth is logged but never trusted: the
                    // next tick re-measures the queue itself.
                    warn!(
                        queue,
                        pid,
                        exit_code,
                        elapsed_ms,
                        reported_depth = record.reported_depth,
                        timed_out = record.timed_out,
                        "Worker finished abnormally"
                    );
                }
            }
        }
    }

    fn write_heartbeat(&self, pid: u32) {
        // Best-effort: a failed heartbeat write must not stop the loop.
        if let Err(e) = self.liveness.touch_heartbeat(pid) {
            error!(error = %e, "Failed to write heartbeat");
        }
    }

    fn shutdown(&self, pid: u32, reason: StopReason) -> Result<(), SchedulerError> {
        for (queue, pool) in &self.pools {
            let timed_out = pool.records().iter().filter(|r| r.timed_out).count();
            info!(
                run_id = %self.run_id,
                queue,
                spawned = pool.spawned_count(),
                still_running = pool.running_count(),
                timed_out,
                "Queue summary"
            );
        }
        info!(run_id = %self.run_id, pid, ?reason, "Scheduler stopping");

        self.liveness.mark_stopped(pid)?;
        Ok(())
    }
}

/// Supervises one worker subprocess off the loop task.
///
/// Forwards each stdout line as a depth event, fires the soft timeout
/// at most once (closing the child's stdin, never killing it), and
/// reports the final exit. The child is expected to wind down on its
/// own after stdin closes.
async fn supervise_child(
    mut child: Child,
    queue: String,
    pid: u32,
    timeout: Duration,
    tx: mpsc::UnboundedSender<ChildEvent>,
) {
    let mut stdin = child.stdin.take();
    let mut lines = child
        .stdout
        .take()
        .map(|stdout| BufReader::new(stdout).lines());

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut timed_out = false;

    // Phase 1: read stdout until EOF, racing the soft timeout.
    loop {
        let next_line = async {
            match lines.as_mut() {
                Some(lines) => lines.next_line().await,
                None => Ok(None),
            }
        };

        tokio::select! {
            line = next_line => match line {
                Ok(Some(text)) => match parse_depth_line(&text) {
                    Some(depth) => {
                        let _ = tx.send(ChildEvent::Depth {
                            queue: queue.clone(),
                            pid,
                            depth,
                        });
                    }
                    None => warn!(queue, pid, line = %text, "Unparseable worker output"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(queue, pid, error = %e, "Failed to read worker stdout");
                    break;
                }
            },
            () = &mut deadline, if !timed_out => {
                timed_out = true;
                drop(stdin.take());
                let _ = tx.send(ChildEvent::TimedOut {
                    queue: queue.clone(),
                    pid,
                });
            }
        }
    }

    // Phase 2: stdout is closed but the process may linger; keep the
    // soft timeout armed while waiting for the real exit.
    let status = if timed_out {
        child.wait().await
    } else {
        tokio::select! {
            status = child.wait() => status,
            () = &mut deadline => {
                drop(stdin.take());
                let _ = tx.send(ChildEvent::TimedOut {
                    queue: queue.clone(),
                    pid,
                });
                child.wait().await
            }
        }
    };

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            error!(queue, pid, error = %e, "Failed to reap worker");
            -1
        }
    };

    let _ = tx.send(ChildEvent::Exited {
        queue,
        pid,
        exit_code,
    });
}

/// Parses one worker stdout line as a base-10 remaining depth.
fn parse_depth_line(line: &str) -> Option<u64> {
    line.trim().parse().ok()
}
