// src/scheduler/task.rs

//! Task bodies, submission options and per-task bookkeeping.

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use serde_json::Value;

use crate::types::{GroupId, Payload, TaskId, TaskState};

/// A named unit of work that can be submitted as a [`TaskBody::Work`].
pub trait Work: Send + 'static {
    fn execute(self: Box<Self>, upstream: UpstreamResults) -> Result<Value>;
}

type RunFn = Box<dyn FnOnce() -> Result<Value> + Send + 'static>;
type ChainedFn = Box<dyn FnOnce(UpstreamResults) -> Result<Value> + Send + 'static>;

/// The executable part of a task. Consumed exactly once by a worker.
pub enum TaskBody {
    /// Zero-argument closure.
    Run(RunFn),
    /// Closure receiving the results of upstream tasks.
    Chained(ChainedFn),
    /// Returns its own values merged with the upstream object results.
    PassThrough(Payload),
    Work(Box<dyn Work>),
}

impl TaskBody {
    pub fn run<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<Value> + Send + 'static,
    {
        TaskBody::Run(Box::new(f))
    }

    pub fn chained<F>(f: F) -> Self
    where
        F: FnOnce(UpstreamResults) -> Result<Value> + Send + 'static,
    {
        TaskBody::Chained(Box::new(f))
    }

    pub fn pass_through(values: Payload) -> Self {
        TaskBody::PassThrough(values)
    }

    pub fn work(work: impl Work) -> Self {
        TaskBody::Work(Box::new(work))
    }

    /// Run the body on the current thread.
    pub fn execute(self, upstream: UpstreamResults) -> Result<Value> {
        match self {
            TaskBody::Run(f) => f(),
            TaskBody::Chained(f) => f(upstream),
            TaskBody::PassThrough(mut values) => {
                values.extend(upstream.merged());
                Ok(Value::Object(values))
            }
            TaskBody::Work(work) => work.execute(upstream),
        }
    }
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TaskBody::Run(_) => "Run",
            TaskBody::Chained(_) => "Chained",
            TaskBody::PassThrough(_) => "PassThrough",
            TaskBody::Work(_) => "Work",
        };
        f.debug_tuple("TaskBody").field(&kind).finish()
    }
}

/// Results of upstream tasks, in the order they completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamResults {
    results: Vec<(TaskId, Value)>,
}

impl UpstreamResults {
    pub fn push(&mut self, upstream: TaskId, result: Value) {
        self.results.push((upstream, result));
    }

    pub fn get(&self, upstream: TaskId) -> Option<&Value> {
        self.results
            .iter()
            .find(|(id, _)| *id == upstream)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Value)> {
        self.results.iter().map(|(id, value)| (*id, value))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Fold every object result into one map. Later completions override
    /// earlier keys; non-object results are skipped.
    pub fn merged(&self) -> Payload {
        let mut merged = Payload::new();
        for (_, value) in &self.results {
            if let Value::Object(map) = value {
                merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged
    }
}

/// Scheduling metadata supplied with a task body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Higher runs first; `None` means [`crate::types::DEFAULT_PRIORITY`].
    pub priority: Option<i32>,
    pub upstream_ids: Vec<TaskId>,
    pub group: Option<GroupId>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn after(mut self, upstream: TaskId) -> Self {
        self.upstream_ids.push(upstream);
        self
    }

    pub fn after_all(mut self, upstream: impl IntoIterator<Item = TaskId>) -> Self {
        self.upstream_ids.extend(upstream);
        self
    }

    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }
}

/// A task handed to a worker by [`crate::scheduler::TaskScheduler::claim_next`].
#[derive(Debug)]
pub struct ClaimedTask {
    pub id: TaskId,
    pub priority: i32,
    pub group: Option<GroupId>,
    pub body: TaskBody,
    pub upstream: UpstreamResults,
}

/// Scheduler-internal record of a submitted task.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub id: TaskId,
    pub priority: i32,
    pub group: Option<GroupId>,
    pub state: TaskState,
    /// Dropped once the task is claimed or reaches a terminal state.
    pub body: Option<TaskBody>,
    /// Upstream tasks that have not completed yet.
    pub waiting_on: HashSet<TaskId>,
    pub upstream: UpstreamResults,
    /// Set when the task is cancelled while running; its outcome is dropped.
    pub discard: bool,
}
