// src/engine/mod.rs

//! Execution engine around the [`crate::scheduler::TaskScheduler`].
//!
//! This module ties together:
//! - the [`manager::TaskManager`] handle callers submit work through
//! - a fixed pool of worker tasks ([`worker`]) that run task bodies on the
//!   blocking thread pool
//! - the [`dispatcher::ResultDispatcher`] that hands results back to the
//!   single control context, in completion order
//!
//! The scheduling semantics live in the pure scheduler; this module only adds
//! threads, locks and channels.

use serde_json::Value;

use crate::errors::TaskError;
use crate::types::{GroupId, TaskId};

pub mod dispatcher;
pub mod manager;
pub(crate) mod worker;

pub use dispatcher::ResultDispatcher;
pub use manager::{ManagerId, ManagerOptions, TaskManager};

/// Notifications delivered to the control context.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// The task body returned a value.
    Completed {
        id: TaskId,
        group: Option<GroupId>,
        result: Value,
    },
    /// The task body returned an error or panicked.
    Failed {
        id: TaskId,
        group: Option<GroupId>,
        error: TaskError,
    },
    /// The task never ran because `upstream` failed or was cancelled.
    Cancelled {
        id: TaskId,
        group: Option<GroupId>,
        upstream: TaskId,
    },
    /// Every task of the group has finished.
    GroupFinished { group: GroupId },
}

impl TaskEvent {
    /// Task the event is about, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::Completed { id, .. }
            | TaskEvent::Failed { id, .. }
            | TaskEvent::Cancelled { id, .. } => Some(*id),
            TaskEvent::GroupFinished { .. } => None,
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self {
            TaskEvent::Completed { group, .. }
            | TaskEvent::Failed { group, .. }
            | TaskEvent::Cancelled { group, .. } => *group,
            TaskEvent::GroupFinished { group } => Some(*group),
        }
    }
}
