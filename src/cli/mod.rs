//! Command-line interface for runforge.
//!
//! Provides commands for running pipelines and single stages, and for
//! inspecting the runs and artifacts they recorded.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
