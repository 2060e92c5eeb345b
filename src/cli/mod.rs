//! Command-line interface for disque-affinity.
//!
//! Provides one subcommand per cluster operation: node listing, push,
//! fetch, ack/nack/delete, queue length and job inspection.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
