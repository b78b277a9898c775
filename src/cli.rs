// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `taskfeed`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskfeed",
    version,
    about = "Maintain the taskfeed data and asset caches.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Defaults to `taskfeed.toml` in the current working directory, or
    /// `TASKFEED_CONFIG` if set. A missing file means built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKFEED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Delete cached files that have not been used for a while.
    Sweep {
        /// Override `[cache].grace_period_days`.
        #[arg(long, value_name = "DAYS")]
        grace_days: Option<i64>,
    },
    /// Load a data cache file and print its tree.
    Inspect {
        /// Cache file to read.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Print the effective configuration.
    Config,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
