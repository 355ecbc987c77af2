//! Command-line interface for scenario-harness.
//!
//! Provides commands for running and improving scenarios, analyzing
//! existing sessions, and querying or exchanging stored runs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
