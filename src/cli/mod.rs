//! Command-line interface for drainer.
//!
//! Provides the supervisor tick, the two scheduler modes, the
//! single-item worker entry point, and a status probe.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
