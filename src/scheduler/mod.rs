//! Background queue-drain scheduling.
//!
//! This module is the heart of the crate: a self-supervising
//! scheduler that periodically drains the configured queues with
//! bounded pools of short-lived worker subprocesses.
//!
//! # Architecture
//!
//! ```text
//!   cron ──► Supervisor.tick ──(no live scheduler?)──► fork
//!                                                        │
//!                                              ┌─────────▼─────────┐
//!                                              │     Scheduler     │
//!                                              │  (one event loop) │
//!                                              │ heartbeat ── 3s   │
//!                                              │ queue tick ─ 1s/q │
//!                                              │ idle check ─ 60s  │
//!                                              │ TTL ─ optional    │
//!                                              └───┬───────────▲───┘
//!                                           spawn ≤ max        │ exit code +
//!                                            per queue         │ depth line
//!                                              ┌───▼───────────┴───┐
//!                                              │ worker subprocess │
//!                                              │ drains ONE item,  │
//!                                              │ prints remaining  │
//!                                              └───────────────────┘
//! ```
//!
//! The loop is single-tasked and cooperative: all bookkeeping happens
//! between timer callbacks, children run as OS processes, and the only
//! cross-run state is the persisted liveness record the supervisor
//! probes.

pub mod event_loop;
pub mod idle;
pub mod invoker;
pub mod pool;
pub mod single;
pub mod supervisor;

pub use event_loop::{ChildEvent, Scheduler, SchedulerError, StopReason};
pub use idle::IdleTracker;
pub use invoker::WorkerInvoker;
pub use pool::{ChildRecord, ChildState, QueuePool, SpawnDecision};
pub use single::{drain_one_item, drain_with_budget, DrainError};
pub use supervisor::{Supervisor, SupervisorError, TickOutcome};
