//! Command-line interface for floweval.
//!
//! Provides the batch evaluation command: read a roster of repository URLs,
//! evaluate each in a sandboxed run, and write one scored result per row.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
