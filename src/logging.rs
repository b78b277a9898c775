// src/logging.rs

//! Logging setup for `taskfeed` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `TASKFEED_LOG` environment variable, either a bare level ("debug") or
//!    full directives ("taskfeed::engine=trace,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout only carries command output such
//! as the `inspect` tree.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when no CLI level is given.
pub const LOG_ENV: &str = "TASKFEED_LOG";

/// Initialise the global logging subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(directive_for(level)),
        None => std::env::var(LOG_ENV)
            .ok()
            .and_then(|spec| filter_from_spec(&spec))
            .unwrap_or_else(|| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("installing log subscriber: {err}"))
}

fn directive_for(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Parse a `TASKFEED_LOG` value. Unparseable values fall back to the default.
fn filter_from_spec(spec: &str) -> Option<EnvFilter> {
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }
    let spec = if spec.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        spec
    };
    match EnvFilter::try_new(spec) {
        Ok(filter) => Some(filter),
        Err(err) => {
            eprintln!("ignoring invalid {LOG_ENV} value {spec:?}: {err}");
            None
        }
    }
}
