// src/errors.rs

//! Crate-wide error types and aliases.

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum TaskfeedError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Invalid grace period of {0} day(s): it must be at least 1")]
    InvalidGracePeriod(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Rejections raised synchronously when submitting work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("upstream task {upstream} was never submitted to this scheduler")]
    UnknownUpstream { upstream: TaskId },

    #[error("task manager has been shut down")]
    ShutDown,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("no cache is loaded")]
    NotLoaded,

    #[error("unknown parent node '{0}'")]
    UnknownParent(String),

    #[error("cache file generation {found} does not match {expected}")]
    GenerationMismatch { found: u32, expected: u32 },

    #[error("corrupt cache file: {0}")]
    Corrupt(String),

    #[error("failed to encode cache: {0}")]
    Encode(String),

    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure captured from a task body and delivered to the control context.
///
/// `traceback` holds the full error chain (the `{:?}` rendering of the
/// underlying `anyhow::Error`), `message` only the outermost context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    pub traceback: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            traceback: message.clone(),
            message,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            traceback: format!("{err:?}"),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskfeedError>;
