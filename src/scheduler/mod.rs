// src/scheduler/mod.rs

//! Task scheduling core.
//!
//! - [`graph`] holds the dependency edges between live tasks.
//! - [`scheduler`] is the synchronous queue that decides what runs next.
//! - [`task`] provides task bodies, submission options and claimed tasks.
//! - [`scheduler_step`] defines the result type of scheduler mutations.
//! - [`state_manager`] performs the state transitions shared by all of them.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub(crate) mod state_manager;
pub mod task;

pub use graph::DependencyGraph;
pub use scheduler::TaskScheduler;
pub use scheduler_step::SchedulerStep;
pub use task::{ClaimedTask, TaskBody, TaskOptions, UpstreamResults, Work};
