//! Dependency graph construction for one project's snapshot.
//!
//! Edges point from a task to the tasks it depends on. Edges that cannot
//! constrain the order (self edges, references to ids outside the snapshot)
//! are dropped here and kept aside for diagnostics; the stored records are
//! never touched.

use crate::models::{TaskId, TaskNode};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Validated adjacency for a single project
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    deps: BTreeMap<TaskId, BTreeSet<TaskId>>,
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
    self_edges: Vec<TaskId>,
    dangling: Vec<(TaskId, TaskId)>,
}

impl DependencyGraph {
    /// Build the graph. Never fails: bad edges degrade to "no constraint".
    pub fn build(nodes: &[TaskNode]) -> Self {
        let known: HashSet<TaskId> = nodes.iter().map(|n| n.id).collect();
        let mut graph = DependencyGraph::default();

        for node in nodes {
            graph.deps.entry(node.id).or_default();
            graph.dependents.entry(node.id).or_default();
        }

        for node in nodes {
            for &dep in &node.dependencies {
                if dep == node.id {
                    graph.self_edges.push(node.id);
                } else if !known.contains(&dep) {
                    graph.dangling.push((node.id, dep));
                } else {
                    graph.deps.entry(node.id).or_default().insert(dep);
                    graph.dependents.entry(dep).or_default().insert(node.id);
                }
            }
        }

        if !graph.self_edges.is_empty() || !graph.dangling.is_empty() {
            debug!(
                self_edges = graph.self_edges.len(),
                dangling = graph.dangling.len(),
                "dropped edges that cannot constrain ordering"
            );
        }

        graph
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Task ids in ascending order
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.deps.keys().copied()
    }

    /// Validated dependencies of `id`
    pub fn dependencies(&self, id: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.deps.get(&id).into_iter().flatten().copied()
    }

    /// Tasks that depend on `id`
    pub fn dependents(&self, id: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.dependents.get(&id).into_iter().flatten().copied()
    }

    pub fn in_degree(&self, id: TaskId) -> usize {
        self.deps.get(&id).map_or(0, BTreeSet::len)
    }

    /// All validated edges as `(task, depends_on)` pairs
    pub fn edges(&self) -> impl Iterator<Item = (TaskId, TaskId)> + '_ {
        self.deps
            .iter()
            .flat_map(|(&task, deps)| deps.iter().map(move |&dep| (task, dep)))
    }

    /// Tasks that listed themselves as a dependency
    pub fn self_edges(&self) -> &[TaskId] {
        &self.self_edges
    }

    /// Edges whose target is not part of the snapshot
    pub fn dangling(&self) -> &[(TaskId, TaskId)] {
        &self.dangling
    }
}

/// Check if adding a dependency would create a cycle using DFS
/// from: the task that will depend on 'to'
/// to: the task that 'from' will depend on
/// Returns the cycle path if a cycle would be created
pub fn would_create_cycle(
    all_deps: &[(TaskId, TaskId)],
    from: TaskId,
    to: TaskId,
) -> Option<Vec<TaskId>> {
    if from == to {
        return Some(vec![from, to]);
    }

    // Edge A -> B means "A depends on B"
    let mut adjacency: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
    for &(task_id, depends_on) in all_deps {
        adjacency.entry(task_id).or_default().insert(depends_on);
    }

    // A path from 'to' back to 'from' closes the loop from -> to -> ... -> from
    let mut visited: HashSet<TaskId> = HashSet::new();
    let mut path: Vec<TaskId> = vec![];

    if dfs_find_path(to, from, &adjacency, &mut visited, &mut path) {
        let mut cycle = vec![from, to];
        cycle.extend(path);
        Some(cycle)
    } else {
        None
    }
}

/// DFS to find a path from 'current' to 'target'
fn dfs_find_path(
    current: TaskId,
    target: TaskId,
    adjacency: &BTreeMap<TaskId, BTreeSet<TaskId>>,
    visited: &mut HashSet<TaskId>,
    path: &mut Vec<TaskId>,
) -> bool {
    if current == target {
        return true;
    }

    if !visited.insert(current) {
        return false;
    }

    if let Some(neighbors) = adjacency.get(&current) {
        for &neighbor in neighbors {
            path.push(neighbor);
            if dfs_find_path(neighbor, target, adjacency, visited, path) {
                return true;
            }
            path.pop();
        }
    }

    false
}
