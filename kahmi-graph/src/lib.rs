// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

//! The build graph: a DAG over tasks plus a selection set (`spec.md §3`,
//! "BuildGraph"; §4.5). Grounded on the teacher's `graph` crate, which
//! backs its dependency DAG with `petgraph` and layers deterministic
//! ordering on top of it.

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

use kahmi_core::{Environment, TaskId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Errors raised while building or ordering a `BuildGraph` (`spec.md §7`).
#[derive(Clone, Debug, PartialEq)]
pub enum GraphError {
    /// A cycle was detected while computing a topological order
    /// (`spec.md §4.5`).
    Cycle,
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::Cycle => write!(f, "cycle detected in the build graph"),
        }
    }
}

impl std::error::Error for GraphError {}

/// A directed graph over tasks plus a selection set (`spec.md §3`,
/// "BuildGraph"). `(u, v)` edges mean "u must complete before v".
pub struct BuildGraph {
    graph: DiGraph<TaskId, ()>,
    index_of: HashMap<TaskId, NodeIndex>,
    selected: HashSet<TaskId>,
}

impl Default for BuildGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildGraph {
    pub fn new() -> BuildGraph {
        BuildGraph {
            graph: DiGraph::new(),
            index_of: HashMap::new(),
            selected: HashSet::new(),
        }
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.index_of.contains_key(&task)
    }

    fn ensure_node(&mut self, task: TaskId) -> NodeIndex {
        *self
            .index_of
            .entry(task)
            .or_insert_with(|| self.graph.add_node(task))
    }

    fn ensure_edge(&mut self, from: TaskId, to: TaskId) {
        let from_idx = self.ensure_node(from);
        let to_idx = self.ensure_node(to);
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Adds `task` and, recursively, its dependencies and finalizers
    /// (`spec.md §4.5`, `add_task`). A no-op if `task` is already a node.
    pub fn add_task(&mut self, env: &Environment, task: TaskId) {
        if self.contains(task) {
            return;
        }
        self.ensure_node(task);

        let Some(task_ref) = env.task(task) else {
            log::warn!("add_task called with a dangling TaskId");
            return;
        };

        for dep in task_ref.compute_all_dependencies() {
            self.add_task(env, dep);
            self.ensure_edge(dep, task);
        }
        for finalizer in task_ref.finalizers().to_vec() {
            self.add_task(env, finalizer);
            self.ensure_edge(task, finalizer);
        }
    }

    /// Marks `task` for execution (`spec.md §4.5`, `select`).
    pub fn select(&mut self, task: TaskId) {
        self.selected.insert(task);
    }

    /// Selects every task in `env` reachable from `root` whose
    /// `default == true` (`spec.md §4.5`, `select_defaults`).
    pub fn select_defaults(&mut self, env: &Environment, root: kahmi_core::ProjectId) {
        for task in env.iter_all_tasks(root) {
            if env.task(task).map(|t| t.default).unwrap_or(false) {
                self.select(task);
            }
        }
    }

    /// The tasks with a direct edge into `task` (its dependencies and, if
    /// `task` is itself a finalizer, the task it finalizes). Used by the
    /// Executor's scheduler to decide when a task becomes ready to dispatch
    /// (`spec.md §5`, "Parallel execution discipline").
    pub fn direct_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        let Some(&idx) = self.index_of.get(&task) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|predecessor| self.graph[predecessor])
            .collect()
    }

    pub fn is_selected(&self, task: TaskId) -> bool {
        self.selected.contains(&task)
    }

    pub fn selected(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.selected.iter().copied()
    }

    /// Returns `true` if any task whose path matches one of `names` (exact
    /// path or trailing segment) is currently selected — the Rust
    /// counterpart of the original's `ProjectGraphHelper.is_selected`
    /// (`SPEC_FULL.md §C.5`).
    pub fn is_any_selected(&self, env: &Environment, names: &[&str]) -> bool {
        self.selected.iter().any(|&task| {
            let path = env.task_path(task);
            names.iter().any(|name| {
                path == *name
                    || path
                        .rsplit(':')
                        .next()
                        .map(|trailing| trailing == *name)
                        .unwrap_or(false)
            })
        })
    }

    /// The transitive closure of `selected`: every ancestor (dependency) and
    /// every finalizer reachable from a selected task, recursively
    /// (`spec.md §4.5`, `tasks_in_order`: "the subgraph induced by the
    /// transitive closure of the selection (with their finalizers)").
    fn scheduling_closure(&self, env: &Environment) -> HashSet<TaskId> {
        let mut closure: HashSet<TaskId> = self.selected.clone();
        let mut frontier: VecDeque<TaskId> = self.selected.iter().copied().collect();

        while let Some(task) = frontier.pop_front() {
            if let Some(&idx) = self.index_of.get(&task) {
                for predecessor in self.graph.neighbors_directed(idx, Direction::Incoming) {
                    let dep = self.graph[predecessor];
                    if closure.insert(dep) {
                        frontier.push_back(dep);
                    }
                }
            }
            if let Some(task_ref) = env.task(task) {
                for &finalizer in task_ref.finalizers() {
                    if closure.insert(finalizer) {
                        frontier.push_back(finalizer);
                    }
                }
            }
        }

        closure
    }

    /// A deterministic topological order over the scheduling closure of the
    /// current selection: Kahn's algorithm, breaking ties by the
    /// lexicographically smallest task path so that build order is
    /// reproducible across runs (`spec.md §4.5`).
    pub fn tasks_in_order(&self, env: &Environment) -> Result<Vec<TaskId>, GraphError> {
        let closure = self.scheduling_closure(env);

        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        for &task in &closure {
            in_degree.insert(task, 0);
        }
        for &task in &closure {
            let Some(&idx) = self.index_of.get(&task) else {
                continue;
            };
            for successor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let succ_task = self.graph[successor];
                if let Some(count) = in_degree.get_mut(&succ_task) {
                    *count += 1;
                }
            }
        }

        // Min-heap on (path, task) so the lexicographically smallest ready
        // path is always emitted next.
        let mut ready: BinaryHeap<std::cmp::Reverse<(String, TaskId)>> = BinaryHeap::new();
        for (&task, &degree) in &in_degree {
            if degree == 0 {
                ready.push(std::cmp::Reverse((env.task_path(task), task)));
            }
        }

        let mut order = Vec::with_capacity(closure.len());
        while let Some(std::cmp::Reverse((_, task))) = ready.pop() {
            order.push(task);
            if let Some(&idx) = self.index_of.get(&task) {
                for successor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    let succ_task = self.graph[successor];
                    if let Some(count) = in_degree.get_mut(&succ_task) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(std::cmp::Reverse((env.task_path(succ_task), succ_task)));
                        }
                    }
                }
            }
        }

        if order.len() != closure.len() {
            return Err(GraphError::Cycle);
        }
        Ok(order)
    }
}

/// Paths of every selector name currently unresolved, used by higher layers
/// to report `SelectorNotMatched` before execution begins.
pub fn selected_paths(graph: &BuildGraph, env: &Environment) -> BTreeSet<String> {
    graph.selected().map(|task| env.task_path(task)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn producer_consumer_env() -> (Environment, TaskId, TaskId) {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let producer = env.add_task(root, "producer").unwrap();
        let consumer = env.add_task(root, "consumer").unwrap();
        env.task_mut(consumer).unwrap().depends_on([producer]);
        (env, producer, consumer)
    }

    #[test]
    fn tasks_in_order_respects_dependency_edges() {
        let (env, producer, consumer) = producer_consumer_env();
        let mut graph = BuildGraph::new();
        graph.add_task(&env, consumer);
        graph.select(consumer);

        let order = graph.tasks_in_order(&env).unwrap();
        assert_eq!(order, vec![producer, consumer]);
    }

    #[test]
    fn tasks_in_order_breaks_ties_lexicographically() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let b = env.add_task(root, "b").unwrap();
        let a = env.add_task(root, "a").unwrap();

        let mut graph = BuildGraph::new();
        graph.add_task(&env, a);
        graph.add_task(&env, b);
        graph.select(a);
        graph.select(b);

        assert_eq!(graph.tasks_in_order(&env).unwrap(), vec![a, b]);
    }

    #[test]
    fn cycle_is_detected() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let a = env.add_task(root, "a").unwrap();
        let b = env.add_task(root, "b").unwrap();
        env.task_mut(a).unwrap().depends_on([b]);
        env.task_mut(b).unwrap().depends_on([a]);

        let mut graph = BuildGraph::new();
        graph.add_task(&env, a);
        graph.select(a);

        assert_eq!(graph.tasks_in_order(&env), Err(GraphError::Cycle));
    }

    #[test]
    fn select_defaults_selects_only_default_tasks() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let default_task = env.add_task(root, "build").unwrap();
        let non_default = env.add_task(root, "debug-dump").unwrap();
        env.task_mut(non_default).unwrap().default = false;

        let mut graph = BuildGraph::new();
        graph.add_task(&env, default_task);
        graph.add_task(&env, non_default);
        graph.select_defaults(&env, root);

        assert!(graph.is_selected(default_task));
        assert!(!graph.is_selected(non_default));
    }

    #[test]
    fn finalizers_are_included_in_the_scheduling_closure() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let main = env.add_task(root, "main").unwrap();
        let cleanup = env.add_task(root, "cleanup").unwrap();
        env.task_mut(main).unwrap().finalized_by([cleanup]);

        let mut graph = BuildGraph::new();
        graph.add_task(&env, main);
        graph.select(main);

        let order = graph.tasks_in_order(&env).unwrap();
        assert_eq!(order, vec![main, cleanup]);
    }
}
