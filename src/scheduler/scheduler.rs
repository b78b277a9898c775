// src/scheduler/scheduler.rs

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::TaskEvent;
use crate::errors::{SchedulingError, TaskError};
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::scheduler_step::SchedulerStep;
use crate::scheduler::state_manager::{ReadyKey, StateManager, Transition};
use crate::scheduler::task::{ClaimedTask, TaskBody, TaskEntry, TaskOptions, UpstreamResults};
use crate::types::{DEFAULT_PRIORITY, GroupId, TaskId, TaskState};

/// Priority/dependency queue of submitted tasks.
///
/// The scheduler is a plain synchronous state machine: it never runs task
/// bodies and owns no threads. The task manager wraps it in a lock, claims
/// work for its workers and forwards the [`SchedulerStep`] events to the
/// result dispatcher.
///
/// It is responsible for:
/// - assigning task and group ids
/// - ordering eligible work by priority, then submission order
/// - unblocking dependents once all their upstream tasks completed
/// - cancelling dependents of failed or cancelled tasks
/// - tracking which delivered results must be dropped after a cancellation
#[derive(Debug)]
pub struct TaskScheduler {
    graph: DependencyGraph,
    /// Live (non-terminal) tasks.
    tasks: HashMap<TaskId, TaskEntry>,
    /// Final state of every task that left `tasks`.
    finished: HashMap<TaskId, TaskState>,
    ready: BTreeSet<ReadyKey>,
    /// Live (non-terminal) members of each group.
    groups: HashMap<GroupId, HashSet<TaskId>>,
    /// Completed/failed results handed to the dispatcher but not yet consumed.
    undelivered: HashMap<TaskId, Option<GroupId>>,
    discarded: HashSet<TaskId>,
    next_id: TaskId,
    next_group: GroupId,
    processing: bool,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TaskScheduler {
    pub fn new(processing: bool) -> Self {
        Self {
            graph: DependencyGraph::new(),
            tasks: HashMap::new(),
            finished: HashMap::new(),
            ready: BTreeSet::new(),
            groups: HashMap::new(),
            undelivered: HashMap::new(),
            discarded: HashSet::new(),
            next_id: 0,
            next_group: 0,
            processing,
        }
    }

    /// Hand out a fresh group id.
    pub fn next_group_id(&mut self) -> GroupId {
        let group = self.next_group;
        self.next_group += 1;
        group
    }

    /// Submit a task.
    ///
    /// Every upstream id must have been returned by an earlier call on this
    /// scheduler. If one of them already failed or was cancelled the new task
    /// is cancelled on the spot and the returned step carries its
    /// `Cancelled` event.
    pub fn add_task(
        &mut self,
        body: TaskBody,
        options: TaskOptions,
    ) -> Result<(TaskId, SchedulerStep), SchedulingError> {
        let mut upstream_ids = options.upstream_ids;
        upstream_ids.sort_unstable();
        upstream_ids.dedup();

        let mut upstream_states = Vec::with_capacity(upstream_ids.len());
        for up in upstream_ids {
            let Some(state) = self.state_of(up) else {
                warn!(upstream = up, "rejecting task with unknown upstream id");
                return Err(SchedulingError::UnknownUpstream { upstream: up });
            };
            upstream_states.push((up, state));
        }

        let id = self.next_id;
        self.next_id += 1;
        let priority = options.priority.unwrap_or(DEFAULT_PRIORITY);
        let group = options.group;

        let mut waiting_on = HashSet::new();
        let mut broken_upstream = None;
        for (up, state) in upstream_states {
            match state {
                TaskState::Completed => {}
                TaskState::Failed | TaskState::Cancelled => {
                    broken_upstream.get_or_insert(up);
                }
                TaskState::Pending | TaskState::Blocked | TaskState::Running => {
                    waiting_on.insert(up);
                }
            }
        }

        if let Some(upstream) = broken_upstream {
            debug!(task = id, upstream, "upstream already failed or cancelled; cancelling new task");
            self.finished.insert(id, TaskState::Cancelled);

            let step = SchedulerStep {
                events: vec![TaskEvent::Cancelled {
                    id,
                    group,
                    upstream,
                }],
                cancelled: vec![id],
            };
            return Ok((id, step));
        }

        let mut entry = TaskEntry {
            id,
            priority,
            group,
            state: TaskState::Pending,
            body: Some(body),
            waiting_on,
            upstream: UpstreamResults::default(),
            discard: false,
        };

        self.graph.add_task(id, entry.waiting_on.iter().copied());
        if let Some(group) = group {
            self.groups.entry(group).or_default().insert(id);
        }

        if entry.waiting_on.is_empty() {
            self.ready.insert(ReadyKey::of(&entry));
        } else {
            entry.state = TaskState::Blocked;
        }

        debug!(task = id, priority, ?group, state = ?entry.state, "task added");
        self.tasks.insert(id, entry);
        Ok((id, SchedulerStep::default()))
    }

    /// Take the highest-priority eligible task and mark it `Running`.
    ///
    /// Returns `None` while processing is paused or nothing is eligible.
    pub fn claim_next(&mut self) -> Option<ClaimedTask> {
        if !self.processing {
            return None;
        }

        while let Some(key) = self.ready.pop_first() {
            let Some(entry) = self.tasks.get_mut(&key.id) else {
                warn!(task = key.id, "ready task missing from task table");
                continue;
            };
            let Some(body) = entry.body.take() else {
                warn!(task = key.id, "ready task has no body; skipping");
                continue;
            };

            entry.state = TaskState::Running;
            debug!(task = entry.id, priority = entry.priority, "task claimed");

            return Some(ClaimedTask {
                id: entry.id,
                priority: entry.priority,
                group: entry.group,
                body,
                upstream: std::mem::take(&mut entry.upstream),
            });
        }

        None
    }

    /// Record the outcome of a claimed task.
    ///
    /// The returned events are, in order: the task's own `Completed` or
    /// `Failed` event, `Cancelled` events for dependents that can no longer
    /// run, and `GroupFinished` for groups that just emptied. A task that was
    /// cancelled while running produces no event of its own.
    pub fn complete(&mut self, id: TaskId, outcome: Result<Value, TaskError>) -> SchedulerStep {
        let (group, discard) = match self.tasks.get(&id) {
            Some(entry) if entry.state == TaskState::Running => (entry.group, entry.discard),
            Some(entry) => {
                warn!(task = id, state = ?entry.state, "completion for a task that is not running; ignoring");
                return SchedulerStep::default();
            }
            None if self.finished.contains_key(&id) => {
                warn!(task = id, "completion for a finished task; ignoring");
                return SchedulerStep::default();
            }
            None => {
                warn!(task = id, "completion for unknown task; ignoring");
                return SchedulerStep::default();
            }
        };

        let mut out = Transition::default();
        let mut state = self.state_manager();

        if discard {
            debug!(task = id, "dropping outcome of a cancelled task");
            state.cancel_dependents(id, group, &mut out);
            state.finish(id, TaskState::Cancelled);
            let mut step = out.into_step();
            step.cancelled.insert(0, id);
            return step;
        }

        match outcome {
            Ok(result) => {
                state.resolve_dependents(id, &result);
                let emptied = state.finish(id, TaskState::Completed);
                debug!(task = id, "task completed");

                out.push_event(TaskEvent::Completed { id, group, result });
                if let Some(group) = emptied {
                    out.group_finished(group);
                }
            }
            Err(error) => {
                info!(task = id, error = %error.message, "task failed");
                out.push_event(TaskEvent::Failed { id, group, error });
                state.cancel_dependents(id, None, &mut out);
                if let Some(group) = state.finish(id, TaskState::Failed) {
                    out.group_finished(group);
                }
            }
        }

        self.undelivered.insert(id, group);
        out.into_step()
    }

    /// Cancel every task of `group` that has not finished.
    ///
    /// Queued members are cancelled without notification; running members
    /// finish but their results are dropped, as are members' results that
    /// are still waiting in the dispatcher. Dependents outside the group are
    /// reported as `Cancelled`.
    pub fn cancel_group(&mut self, group: GroupId) -> SchedulerStep {
        let mut members: Vec<TaskId> = self
            .groups
            .get(&group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();

        let mut out = Transition::default();
        let mut state = self.state_manager();
        for id in members {
            state.cancel_requested(id, Some(group), &mut out);
        }

        for (id, task_group) in &self.undelivered {
            if *task_group == Some(group) {
                self.discarded.insert(*id);
            }
        }

        let step = out.into_step();
        info!(group, cancelled = step.cancelled.len(), "group cancelled");
        step
    }

    /// Cancel a single task and, transitively, its dependents.
    pub fn cancel_task(&mut self, id: TaskId) -> SchedulerStep {
        let mut out = Transition::default();
        self.state_manager().cancel_requested(id, None, &mut out);
        if self.undelivered.contains_key(&id) {
            self.discarded.insert(id);
        }
        out.into_step()
    }

    /// Cancel everything. Nothing is reported and nothing undelivered is
    /// delivered.
    pub fn cancel_all(&mut self) -> SchedulerStep {
        let mut live: Vec<TaskId> = self.tasks.keys().copied().collect();
        live.sort_unstable();

        let mut out = Transition::default();
        let mut state = self.state_manager();
        for id in live {
            state.cancel_requested(id, None, &mut out);
        }

        self.discarded.extend(self.undelivered.keys().copied());

        let mut step = out.into_step();
        step.events.clear();
        info!(cancelled = step.cancelled.len(), "all tasks cancelled");
        step
    }

    /// Called by the dispatcher right before handing `event` to the consumer.
    /// Returns `false` if the event belongs to a task cancelled after it
    /// finished.
    pub fn take_delivery(&mut self, event: &TaskEvent) -> bool {
        match event {
            TaskEvent::Completed { id, .. } | TaskEvent::Failed { id, .. } => {
                self.undelivered.remove(id);
                !self.discarded.remove(id)
            }
            TaskEvent::Cancelled { .. } | TaskEvent::GroupFinished { .. } => true,
        }
    }

    pub fn set_processing(&mut self, processing: bool) {
        if self.processing != processing {
            info!(processing, "task processing toggled");
        }
        self.processing = processing;
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.tasks
            .get(&id)
            .map(|entry| entry.state)
            .or_else(|| self.finished.get(&id).copied())
    }

    /// Number of tasks eligible to run right now.
    pub fn pending_count(&self) -> usize {
        self.ready.len()
    }

    pub fn running_count(&self) -> usize {
        self.count_in(TaskState::Running)
    }

    pub fn blocked_count(&self) -> usize {
        self.count_in(TaskState::Blocked)
    }

    /// `true` if no task is queued, blocked or running.
    pub fn is_idle(&self) -> bool {
        self.graph.is_empty()
    }

    fn count_in(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|entry| entry.state == state).count()
    }

    fn state_manager(&mut self) -> StateManager<'_> {
        StateManager::new(
            &mut self.graph,
            &mut self.tasks,
            &mut self.finished,
            &mut self.ready,
            &mut self.groups,
        )
    }
}
