//! Command-line interface for archforge.
//!
//! Provides commands for serving the API, running the lane pipeline, and
//! operating the job queue.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, LogFormat};
