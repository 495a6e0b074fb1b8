//! Child process bookkeeping for one queue.
//!
//! Each spawned worker subprocess gets a `ChildRecord` with an
//! immutable identity (PID) and mutable lifecycle fields. Records are
//! terminal once an end time is set and are never removed; memory
//! growth is bounded only by run length, which the idle and TTL
//! timers cap.

use chrono::{DateTime, Utc};

/// Lifecycle state derived from a record's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// The process has been spawned and has not exited yet.
    Running,
    /// The process exited with code 0.
    ExitedNormally,
    /// The process exited with a non-zero code.
    ExitedWithError,
    /// The soft timeout fired before the process exited.
    TimedOut,
}

/// Bookkeeping for one spawned worker subprocess.
#[derive(Debug, Clone)]
pub struct ChildRecord {
    /// OS process id.
    pub pid: u32,
    /// Queue this worker drains.
    pub queue: String,
    /// When the process was spawned.
    pub start_time: DateTime<Utc>,
    /// When the process exited; `None` while running.
    pub end_time: Option<DateTime<Utc>>,
    /// Exit code, once the process has exited.
    pub exit_code: Option<i32>,
    /// Last remaining-depth value the worker printed. Observability
    /// only; spawn decisions always re-measure the queue.
    pub reported_depth: Option<u64>,
    /// Whether the soft timeout fired for this child.
    pub timed_out: bool,
}

impl ChildRecord {
    /// Creates a record for a freshly spawned child.
    pub fn spawned(pid: u32, queue: impl Into<String>) -> Self {
        Self {
            pid,
            queue: queue.into(),
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            reported_depth: None,
            timed_out: false,
        }
    }

    /// Returns the derived lifecycle state.
    pub fn state(&self) -> ChildState {
        match (self.end_time, self.exit_code, self.timed_out) {
            (None, ..) => ChildState::Running,
            (Some(_), _, true) => ChildState::TimedOut,
            (Some(_), Some(0), false) => ChildState::ExitedNormally,
            (Some(_), _, false) => ChildState::ExitedWithError,
        }
    }

    /// True while the process has not exited.
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed wall-clock time, up to exit or now.
    pub fn elapsed(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}

/// What a queue tick should do, given current pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnDecision {
    /// Below the concurrency bound with work pending: spawn one child.
    Spawn,
    /// Nothing pending and nothing in flight: count an idle cycle.
    Idle,
    /// At the concurrency bound: skip this tick, neither reset nor
    /// decrement the idle counter.
    Saturated,
    /// Nothing pending but children still running: the queue is busy,
    /// not idle.
    HasWorkInFlight,
}

impl SpawnDecision {
    /// The admission rule for one queue tick.
    pub fn decide(running: usize, depth: u64, max_concurrent: usize) -> Self {
        if running >= max_concurrent {
            Self::Saturated
        } else if depth > 0 {
            Self::Spawn
        } else if running == 0 {
            Self::Idle
        } else {
            Self::HasWorkInFlight
        }
    }
}

/// Child records for one queue.
#[derive(Debug, Default)]
pub struct QueuePool {
    records: Vec<ChildRecord>,
}

impl QueuePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly spawned child.
    pub fn insert(&mut self, record: ChildRecord) {
        self.records.push(record);
    }

    /// Number of children that have not exited.
    pub fn running_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_running()).count()
    }

    /// Total children spawned over this run.
    pub fn spawned_count(&self) -> usize {
        self.records.len()
    }

    /// Looks up a record by PID.
    pub fn record(&self, pid: u32) -> Option<&ChildRecord> {
        self.records.iter().find(|r| r.pid == pid)
    }

    fn record_mut(&mut self, pid: u32) -> Option<&mut ChildRecord> {
        self.records.iter_mut().find(|r| r.pid == pid)
    }

    /// Stores the depth a running child reported on stdout. Last value
    /// wins; terminal records are left untouched.
    pub fn record_depth(&mut self, pid: u32, depth: u64) {
        if let Some(record) = self.record_mut(pid) {
            if record.is_running() {
                record.reported_depth = Some(depth);
            }
        }
    }

    /// Flags a running child as soft-timed-out. The record stays
    /// non-terminal until the process actually exits.
    pub fn mark_timed_out(&mut self, pid: u32) {
        if let Some(record) = self.record_mut(pid) {
            if record.is_running() {
                record.timed_out = true;
            }
        }
    }

    /// Finalizes a child on exit. Returns the finished record for
    /// logging. A record already terminal is not mutated again.
    pub fn mark_exit(&mut self, pid: u32, exit_code: i32) -> Option<ChildRecord> {
        let record = self.record_mut(pid)?;
        if !record.is_running() {
            return None;
        }
        record.end_time = Some(Utc::now());
        record.exit_code = Some(exit_code);
        Some(record.clone())
    }

    /// All records, running and finished.
    pub fn records(&self) -> &[ChildRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_decision_spawns_below_bound() {
        assert_eq!(SpawnDecision::decide(0, 5, 2), SpawnDecision::Spawn);
        assert_eq!(SpawnDecision::decide(1, 5, 2), SpawnDecision::Spawn);
    }

    #[test]
    fn test_spawn_decision_saturated() {
        assert_eq!(SpawnDecision::decide(2, 5, 2), SpawnDecision::Saturated);
        // Never spawn past the bound even if depth is huge
        assert_eq!(SpawnDecision::decide(3, 1000, 2), SpawnDecision::Saturated);
    }

    #[test]
    fn test_spawn_decision_idle() {
        assert_eq!(SpawnDecision::decide(0, 0, 2), SpawnDecision::Idle);
    }

    #[test]
    fn test_spawn_decision_in_flight() {
        assert_eq!(SpawnDecision::decide(1, 0, 2), SpawnDecision::HasWorkInFlight);
    }

    #[test]
    fn test_record_lifecycle() {
        let mut pool = QueuePool::new();
        pool.insert(ChildRecord::spawned(100, "ingest"));

        assert_eq!(pool.running_count(), 1);
        assert_eq!(pool.record(100).unwrap().state(), ChildState::Running);

        let finished = pool.mark_exit(100, 0).unwrap();
        assert_eq!(finished.state(), ChildState::ExitedNormally);
        assert_eq!(pool.running_count(), 0);
        // Records are retained after exit
        assert_eq!(pool.spawned_count(), 1);
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let mut pool = QueuePool::new();
        pool.insert(ChildRecord::spawned(100, "ingest"));
        pool.mark_exit(100, 0);

        // None of these may touch a finished record
        assert!(pool.mark_exit(100, 137).is_none());
        pool.record_depth(100, 9);
        pool.mark_timed_out(100);

        let record = pool.record(100).unwrap();
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(record.reported_depth, None);
        assert!(!record.timed_out);
    }

    #[test]
    fn test_reported_depth_last_wins() {
        let mut pool = QueuePool::new();
        pool.insert(ChildRecord::spawned(100, "ingest"));

        pool.record_depth(100, 7);
        pool.record_depth(100, 3);
        assert_eq!(pool.record(100).unwrap().reported_depth, Some(3));
    }

    #[test]
    fn test_timed_out_child_stays_running_until_exit() {
        let mut pool = QueuePool::new();
        pool.insert(ChildRecord::spawned(100, "ingest"));

        pool.mark_timed_out(100);
        let record = pool.record(100).unwrap();
        assert!(record.timed_out);
        assert!(record.is_running());

        let finished = pool.mark_exit(100, 1).unwrap();
        assert!(finished.timed_out);
        assert_eq!(finished.state(), ChildState::TimedOut);
    }

    #[test]
    fn test_crashed_child_with_reported_depth() {
        // Worker printed "7" then died with 137; the record keeps both,
        // but nothing downstream treats the 7 as authoritative.
        let mut pool = QueuePool::new();
        pool.insert(ChildRecord::spawned(100, "ingest"));

        pool.record_depth(100, 7);
        let finished = pool.mark_exit(100, 137).unwrap();

        assert_eq!(finished.exit_code, Some(137));
        assert_eq!(finished.reported_depth, Some(7));
        assert!(!finished.timed_out);
        assert_eq!(finished.state(), ChildState::ExitedWithError);
    }

    #[test]
    fn test_running_count_across_multiple_children() {
        let mut pool = QueuePool::new();
        pool.insert(ChildRecord::spawned(1, "ingest"));
        pool.insert(ChildRecord::spawned(2, "ingest"));
        pool.insert(ChildRecord::spawned(3, "ingest"));
        pool.mark_exit(2, 0);

        assert_eq!(pool.running_count(), 2);
        assert_eq!(pool.spawned_count(), 3);
    }
}
