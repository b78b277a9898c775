// src/scheduler/scheduler_step.rs

//! Result type for a single scheduler mutation.

use crate::engine::TaskEvent;
use crate::types::TaskId;

/// What changed as a result of one scheduler call.
///
/// `events` are in delivery order and are forwarded to the result dispatcher
/// by the task manager. Tests that drive the scheduler by hand can assert on
/// them directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStep {
    pub events: Vec<TaskEvent>,
    /// Every task moved to `Cancelled` by this call, reported or not.
    pub cancelled: Vec<TaskId>,
}

impl SchedulerStep {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.cancelled.is_empty()
    }
}
