//! Command-line interface for android-world-bench.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
