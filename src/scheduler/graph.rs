// src/scheduler/graph.rs

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;

use crate::types::TaskId;

/// Dependency edges between live tasks.
///
/// Edge direction: upstream -> dependent. Tasks are removed as soon as they
/// reach a terminal state, so the graph only ever holds work that can still
/// run. Cycles cannot form because a task may only depend on ids that were
/// handed out before it.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraphMap<TaskId, ()>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `task` together with edges from each of its live upstream tasks.
    pub fn add_task(&mut self, task: TaskId, upstream: impl IntoIterator<Item = TaskId>) {
        self.graph.add_node(task);
        for up in upstream {
            self.graph.add_edge(up, task, ());
        }
    }

    /// Immediate dependents, in ascending id order.
    pub fn dependents_of(&self, task: TaskId) -> Vec<TaskId> {
        self.neighbors(task, Direction::Outgoing)
    }

    pub fn remove(&mut self, task: TaskId) {
        self.graph.remove_node(task);
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors(&self, task: TaskId, dir: Direction) -> Vec<TaskId> {
        if !self.graph.contains_node(task) {
            return Vec::new();
        }
        let mut ids: Vec<TaskId> = self.graph.neighbors_directed(task, dir).collect();
        ids.sort_unstable();
        ids
    }
}
