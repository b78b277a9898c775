// src/scheduler/state_manager.rs

//! State transitions shared by every scheduler operation.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::TaskEvent;
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::scheduler_step::SchedulerStep;
use crate::scheduler::task::TaskEntry;
use crate::types::{GroupId, TaskId, TaskState};

/// Ordering key of the ready set: highest priority first, then lowest id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ReadyKey {
    pub priority: Reverse<i32>,
    pub id: TaskId,
}

impl ReadyKey {
    pub fn of(entry: &TaskEntry) -> Self {
        Self {
            priority: Reverse(entry.priority),
            id: entry.id,
        }
    }
}

/// Accumulates the observable effects of a group of transitions.
///
/// Group-finished notifications are held back so they are always delivered
/// after the task events that caused them.
#[derive(Debug, Default)]
pub(crate) struct Transition {
    step: SchedulerStep,
    finished_groups: Vec<GroupId>,
}

impl Transition {
    pub fn push_event(&mut self, event: TaskEvent) {
        self.step.events.push(event);
    }

    pub fn group_finished(&mut self, group: GroupId) {
        if !self.finished_groups.contains(&group) {
            self.finished_groups.push(group);
        }
    }

    pub fn into_step(mut self) -> SchedulerStep {
        self.step.events.extend(
            self.finished_groups
                .into_iter()
                .map(|group| TaskEvent::GroupFinished { group }),
        );
        self.step
    }
}

/// Borrowed view over the scheduler tables that performs state transitions.
pub(crate) struct StateManager<'a> {
    graph: &'a mut DependencyGraph,
    tasks: &'a mut HashMap<TaskId, TaskEntry>,
    finished: &'a mut HashMap<TaskId, TaskState>,
    ready: &'a mut BTreeSet<ReadyKey>,
    groups: &'a mut HashMap<GroupId, HashSet<TaskId>>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a mut DependencyGraph,
        tasks: &'a mut HashMap<TaskId, TaskEntry>,
        finished: &'a mut HashMap<TaskId, TaskState>,
        ready: &'a mut BTreeSet<ReadyKey>,
        groups: &'a mut HashMap<GroupId, HashSet<TaskId>>,
    ) -> Self {
        Self {
            graph,
            tasks,
            finished,
            ready,
            groups,
        }
    }

    /// Move a task to a terminal state. Its entry is dropped and only the
    /// final state is kept. Returns the task's group if this emptied it.
    pub fn finish(&mut self, id: TaskId, state: TaskState) -> Option<GroupId> {
        debug_assert!(state.is_terminal());

        let entry = self.tasks.remove(&id)?;
        self.ready.remove(&ReadyKey::of(&entry));
        self.finished.insert(id, state);
        let group = entry.group;

        self.graph.remove(id);

        let group = group?;
        let members = self.groups.get_mut(&group)?;
        members.remove(&id);
        if members.is_empty() {
            self.groups.remove(&group);
            Some(group)
        } else {
            None
        }
    }

    /// Hand `result` to every live dependent of `id` and promote the ones
    /// whose upstream tasks have now all completed.
    pub fn resolve_dependents(&mut self, id: TaskId, result: &Value) {
        for dependent in self.graph.dependents_of(id) {
            let Some(entry) = self.tasks.get_mut(&dependent) else {
                warn!(task = dependent, "dependent missing from task table");
                continue;
            };

            entry.upstream.push(id, result.clone());
            entry.waiting_on.remove(&id);

            if entry.state == TaskState::Blocked && entry.waiting_on.is_empty() {
                entry.state = TaskState::Pending;
                self.ready.insert(ReadyKey::of(entry));
                debug!(task = dependent, upstream = id, "dependencies satisfied; task is now pending");
            }
        }
    }

    /// Cancel every live transitive dependent of `root`.
    ///
    /// Dependents that belong to `silent_group` are cancelled without a
    /// notification because the caller asked for their group to go away.
    pub fn cancel_dependents(
        &mut self,
        root: TaskId,
        silent_group: Option<GroupId>,
        out: &mut Transition,
    ) {
        let mut stack: Vec<(TaskId, TaskId)> = self
            .graph
            .dependents_of(root)
            .into_iter()
            .rev()
            .map(|dependent| (root, dependent))
            .collect();

        while let Some((upstream, id)) = stack.pop() {
            let Some(entry) = self.tasks.get(&id) else {
                continue;
            };
            if !matches!(entry.state, TaskState::Pending | TaskState::Blocked) {
                continue;
            }

            let group = entry.group;
            let silent = silent_group.is_some() && group == silent_group;
            let next = self.graph.dependents_of(id);

            let emptied = self.finish(id, TaskState::Cancelled);
            out.step.cancelled.push(id);
            debug!(task = id, upstream, "cancelling dependent of a task that did not complete");

            if !silent {
                out.push_event(TaskEvent::Cancelled {
                    id,
                    group,
                    upstream,
                });
                if let Some(group) = emptied {
                    out.group_finished(group);
                }
            }

            stack.extend(next.into_iter().rev().map(|dependent| (id, dependent)));
        }
    }

    /// Cancel a task on explicit request.
    ///
    /// Queued tasks are cancelled immediately, running tasks are flagged so
    /// their outcome is dropped when they finish, terminal tasks are left
    /// alone. Returns `true` if the task was cancelled or flagged.
    pub fn cancel_requested(
        &mut self,
        id: TaskId,
        silent_group: Option<GroupId>,
        out: &mut Transition,
    ) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };

        match entry.state {
            TaskState::Pending | TaskState::Blocked => {
                out.step.cancelled.push(id);
                self.cancel_dependents(id, silent_group, out);
                self.finish(id, TaskState::Cancelled);
                true
            }
            TaskState::Running => {
                entry.discard = true;
                debug!(task = id, "task is running; its result will be discarded");
                true
            }
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => false,
        }
    }
}
