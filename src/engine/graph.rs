// ABOUTME: Task graph construction, cycle detection, and dependency queries
// ABOUTME: Computes ready sets against a run and batched execution plans

use indexmap::IndexMap;
use petgraph::algo::{astar, has_path_connecting};
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};
use petgraph::Graph;
use std::collections::{HashMap, HashSet};

use super::error::GraphError;
use super::run::{Run, TaskState};
use super::task::Task;

type Result<T> = std::result::Result<T, GraphError>;

/// A directed acyclic graph of tasks. Edges point from a predecessor to the
/// task that depends on it.
///
/// Predecessors may be referenced before they are added; such references are
/// held as placeholder nodes and must all be resolved by [`TaskGraph::freeze`].
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: Graph<String, ()>,
    task_indices: HashMap<String, NodeIndex>,
    tasks: IndexMap<String, Task>,
    frozen: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub batches: Vec<Vec<String>>,
    pub total_tasks: usize,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every task, then freeze the graph
    pub fn build<I>(tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = Task>,
    {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task)?;
        }
        graph.freeze()?;
        Ok(graph)
    }

    /// Add a task together with the edges from its predecessors.
    ///
    /// The graph is left untouched when an error is returned.
    pub fn add_task(&mut self, mut task: Task) -> Result<()> {
        if self.frozen {
            return Err(GraphError::GraphFrozen { task_id: task.id });
        }
        if self.tasks.contains_key(&task.id) {
            return Err(GraphError::DuplicateTask { task_id: task.id });
        }

        let mut seen = HashSet::new();
        task.depends_on.retain(|dep| seen.insert(dep.clone()));

        for dependency in &task.depends_on {
            if dependency == &task.id {
                return Err(GraphError::CycleError {
                    path: vec![task.id.clone(), task.id.clone()],
                });
            }
            if let Some(path) = self.path_between(&task.id, dependency) {
                let mut cycle = vec![dependency.clone()];
                cycle.extend(path);
                return Err(GraphError::CycleError { path: cycle });
            }
        }

        let node = self.node_for(&task.id);
        for dependency in &task.depends_on {
            let dep_node = self.node_for(dependency);
            self.graph.add_edge(dep_node, node, ());
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Reject unresolved forward references and make the graph immutable
    pub fn freeze(&mut self) -> Result<()> {
        for task in self.tasks.values() {
            if let Some(missing) = task
                .depends_on
                .iter()
                .find(|dep| !self.tasks.contains_key(*dep))
            {
                return Err(GraphError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }
        self.frozen = true;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Tasks in definition order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Pending tasks whose every predecessor has succeeded, in definition order
    pub fn ready_set(&self, run: &Run) -> Vec<String> {
        self.tasks
            .values()
            .filter(|task| run.state(&task.id) == Some(TaskState::Pending))
            .filter(|task| {
                task.depends_on
                    .iter()
                    .all(|dep| run.state(dep) == Some(TaskState::Succeeded))
            })
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn predecessors(&self, task_id: &str) -> Vec<String> {
        self.tasks
            .get(task_id)
            .map(|task| task.depends_on.clone())
            .unwrap_or_default()
    }

    /// Direct dependents, in definition order
    pub fn successors(&self, task_id: &str) -> Vec<String> {
        self.tasks
            .values()
            .filter(|task| task.depends_on.iter().any(|dep| dep == task_id))
            .map(|task| task.id.clone())
            .collect()
    }

    /// Every task that transitively depends on `task_id`, in definition order
    pub fn descendants(&self, task_id: &str) -> Vec<String> {
        let Some(&start) = self.task_indices.get(task_id) else {
            return Vec::new();
        };

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                reached.insert(self.graph[node].as_str());
            }
        }

        self.tasks
            .keys()
            .filter(|id| reached.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Every task `task_id` transitively depends on, in definition order
    pub fn ancestors(&self, task_id: &str) -> Vec<String> {
        let Some(&start) = self.task_indices.get(task_id) else {
            return Vec::new();
        };

        let reversed = Reversed(&self.graph);
        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(reversed, start);
        while let Some(node) = dfs.next(reversed) {
            if node != start {
                reached.insert(self.graph[node].as_str());
            }
        }

        self.tasks
            .keys()
            .filter(|id| reached.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Tasks without predecessors
    pub fn roots(&self) -> Vec<String> {
        self.tasks
            .values()
            .filter(|task| task.depends_on.is_empty())
            .map(|task| task.id.clone())
            .collect()
    }

    /// Tasks nothing depends on
    pub fn leaves(&self) -> Vec<String> {
        self.tasks
            .keys()
            .filter(|id| self.successors(id).is_empty())
            .cloned()
            .collect()
    }

    pub fn topological_order(&self) -> Vec<String> {
        self.execution_plan().batches.into_iter().flatten().collect()
    }

    /// Group tasks into waves whose dependencies are all satisfied by earlier waves
    pub fn execution_plan(&self) -> ExecutionPlan {
        let mut batches = Vec::new();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&Task> = self.tasks.values().collect();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Task>, Vec<&Task>) =
                remaining.into_iter().partition(|task| {
                    task.depends_on
                        .iter()
                        .all(|dep| completed.contains(dep.as_str()))
                });

            if ready.is_empty() {
                // Only reachable for an unfrozen graph with dangling references.
                break;
            }

            completed.extend(ready.iter().map(|task| task.id.as_str()));
            batches.push(ready.iter().map(|task| task.id.clone()).collect());
            remaining = blocked;
        }

        ExecutionPlan {
            batches,
            total_tasks: self.tasks.len(),
        }
    }

    fn node_for(&mut self, task_id: &str) -> NodeIndex {
        if let Some(&node) = self.task_indices.get(task_id) {
            return node;
        }
        let node = self.graph.add_node(task_id.to_string());
        self.task_indices.insert(task_id.to_string(), node);
        node
    }

    /// Shortest existing path `from -> ... -> to`, if any
    fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let from_node = *self.task_indices.get(from)?;
        let to_node = *self.task_indices.get(to)?;
        if !has_path_connecting(&self.graph, from_node, to_node, None) {
            return None;
        }

        let (_, nodes) = astar(
            &self.graph,
            from_node,
            |node| node == to_node,
            |_| 1usize,
            |_| 0usize,
        )?;
        Some(nodes.into_iter().map(|n| self.graph[n].clone()).collect())
    }
}

impl ExecutionPlan {
    /// Size of the widest batch
    pub fn max_parallelism(&self) -> usize {
        self.batches
            .iter()
            .map(|batch| batch.len())
            .max()
            .unwrap_or(0)
    }

    pub fn execution_depth(&self) -> usize {
        self.batches.len()
    }

    pub fn get_task_batch_index(&self, task_id: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|id| id == task_id))
    }
}
