// src/types.rs

//! Small shared types used across the scheduler, the engine and the cache.

use serde::{Deserialize, Serialize};

/// Identifier handed out by a scheduler at submission time.
///
/// Ids start at 0, increase monotonically and are never reused.
pub type TaskId = u64;

/// Identifier of a bulk-cancellation group.
pub type GroupId = u64;

/// A JSON object snapshot, used for task results and cached remote records.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Priority used when a task does not specify one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Lifecycle of a submitted task.
///
/// Tasks start as `Pending` (eligible) or `Blocked` (waiting on upstream
/// tasks). `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Blocked,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// How the result dispatcher treats undelivered results on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Deliver every result that was produced before the workers stopped.
    #[default]
    Drain,
    /// Discard anything not yet delivered.
    Hard,
}
