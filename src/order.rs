//! Execution order resolution.
//!
//! Kahn's algorithm with a min-heap keyed on the previous execution order,
//! then creation time, then id. Feeding the previous order back in as the
//! key keeps an already legal order unchanged and only pushes a dependent
//! later when an edge demands it.

use crate::graph::DependencyGraph;
use crate::models::{OrderConflict, Task, TaskId, TaskNode};
use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

/// Total ordering key used to pick among ready tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TieBreakKey {
    pub seed: i64,
    pub created_at: DateTime<Utc>,
    pub id: TaskId,
}

impl TieBreakKey {
    pub fn of(node: &TaskNode) -> Self {
        TieBreakKey {
            seed: node.execution_order,
            created_at: node.created_at,
            id: node.id,
        }
    }
}

/// A ready task in the priority queue
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapTask {
    key: TieBreakKey,
}

impl Ord for HeapTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap (lowest key = highest priority)
        other.key.cmp(&self.key)
    }
}

impl PartialOrd for HeapTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of resolving one project's order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Task ids, position `i` gets execution order `i`
    pub order: Vec<TaskId>,
    /// `(task, depends_on)` edges ignored to break cycles
    pub broken_edges: Vec<(TaskId, TaskId)>,
}

impl Resolution {
    /// Map of task id to its new execution order
    pub fn positions(&self) -> HashMap<TaskId, i64> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i as i64))
            .collect()
    }

    pub fn has_cycles(&self) -> bool {
        !self.broken_edges.is_empty()
    }
}

/// Resolve an order seeded with each node's current execution order
pub fn resolve(nodes: &[TaskNode], graph: &DependencyGraph) -> Resolution {
    let mut keys: HashMap<TaskId, TieBreakKey> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        keys.entry(node.id).or_insert_with(|| TieBreakKey::of(node));
    }
    resolve_with_keys(graph, &keys)
}

/// Resolve an order using explicit tie-break keys
pub(crate) fn resolve_with_keys(
    graph: &DependencyGraph,
    keys: &HashMap<TaskId, TieBreakKey>,
) -> Resolution {
    let n = graph.len();
    let key_of = |id: TaskId| {
        keys.get(&id).copied().unwrap_or(TieBreakKey {
            seed: i64::MAX,
            created_at: DateTime::<Utc>::MAX_UTC,
            id,
        })
    };

    let mut in_degree: HashMap<TaskId, usize> =
        graph.task_ids().map(|id| (id, graph.in_degree(id))).collect();

    // Seed min-heap with in-degree 0 tasks
    let mut heap: BinaryHeap<HeapTask> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&id, _)| HeapTask { key: key_of(id) })
        .collect();

    let mut placed: HashSet<TaskId> = HashSet::with_capacity(n);
    let mut resolution = Resolution {
        order: Vec::with_capacity(n),
        broken_edges: vec![],
    };

    while resolution.order.len() < n {
        let next = match heap.pop() {
            Some(ready) => ready.key.id,
            None => {
                // Everything left sits on or behind a cycle
                let Some(forced) = pick_cycle_breaker(graph, &placed, key_of) else {
                    break;
                };
                for dep in graph.dependencies(forced) {
                    if !placed.contains(&dep) {
                        resolution.broken_edges.push((forced, dep));
                    }
                }
                forced
            }
        };

        placed.insert(next);
        resolution.order.push(next);

        for dependent in graph.dependents(next) {
            if placed.contains(&dependent) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    heap.push(HeapTask {
                        key: key_of(dependent),
                    });
                }
            }
        }
    }

    if resolution.has_cycles() {
        warn!(
            broken = ?resolution.broken_edges,
            "dependency cycle broken to complete the order"
        );
    }
    debug!(tasks = n, "resolved execution order");

    resolution
}

/// Choose the node to force when no task is ready.
///
/// Only strongly connected components whose unplaced dependencies all lie
/// inside the component are candidates, so the edges broken by forcing the
/// lowest-key member are always edges of that cycle.
fn pick_cycle_breaker(
    graph: &DependencyGraph,
    placed: &HashSet<TaskId>,
    key_of: impl Fn(TaskId) -> TieBreakKey + Copy,
) -> Option<TaskId> {
    let components = remaining_components(graph, placed);

    let candidate = components
        .iter()
        .filter(|component| {
            let members: HashSet<TaskId> = component.iter().copied().collect();
            component.iter().all(|&id| {
                graph
                    .dependencies(id)
                    .all(|dep| placed.contains(&dep) || members.contains(&dep))
            })
        })
        .filter_map(|component| component.iter().copied().min_by_key(|&id| key_of(id)))
        .min_by_key(|&id| key_of(id));

    candidate.or_else(|| {
        graph
            .task_ids()
            .filter(|id| !placed.contains(id))
            .min_by_key(|&id| key_of(id))
    })
}

/// Strongly connected components of the unplaced part of the graph
fn remaining_components(graph: &DependencyGraph, placed: &HashSet<TaskId>) -> Vec<Vec<TaskId>> {
    let mut remaining: DiGraphMap<TaskId, ()> = DiGraphMap::new();
    for id in graph.task_ids().filter(|id| !placed.contains(id)) {
        remaining.add_node(id);
    }
    for (task, dep) in graph.edges() {
        if !placed.contains(&task) && !placed.contains(&dep) {
            remaining.add_edge(task, dep, ());
        }
    }

    tarjan_scc(&remaining)
}

/// Write a resolution back onto the tasks. Returns the ids whose order changed.
pub fn assign_execution_order(tasks: &mut [Task], resolution: &Resolution) -> Vec<TaskId> {
    let positions = resolution.positions();
    let mut changed = Vec::new();

    for task in tasks.iter_mut() {
        if let Some(&order) = positions.get(&task.id) {
            if task.execution_order != order {
                task.execution_order = order;
                changed.push(task.id);
            }
        }
    }

    changed
}

/// Full recompute over one project's tasks
pub fn recompute(tasks: &mut [Task]) -> (Resolution, Vec<TaskId>) {
    let nodes: Vec<TaskNode> = tasks.iter().map(Task::node).collect();
    let graph = DependencyGraph::build(&nodes);
    let resolution = resolve(&nodes, &graph);
    let changed = assign_execution_order(tasks, &resolution);
    (resolution, changed)
}

/// Detect order conflicts where a task is not placed after one of its dependencies
pub fn detect_order_conflicts(nodes: &[TaskNode], graph: &DependencyGraph) -> Vec<OrderConflict> {
    let order_map: HashMap<TaskId, i64> =
        nodes.iter().map(|n| (n.id, n.execution_order)).collect();

    graph
        .edges()
        .filter_map(|(task_id, dep_id)| {
            let task_order = *order_map.get(&task_id)?;
            let dep_order = *order_map.get(&dep_id)?;
            (task_order <= dep_order).then_some(OrderConflict {
                task_id,
                task_order,
                dep_id,
                dep_order,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use chrono::{Duration, TimeZone};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn node(id: TaskId, order: i64, deps: &[TaskId]) -> TaskNode {
        TaskNode {
            id,
            dependencies: deps.iter().copied().collect(),
            status: Status::Pending,
            execution_order: order,
            created_at: epoch(),
        }
    }

    fn run(nodes: &[TaskNode]) -> Resolution {
        resolve(nodes, &DependencyGraph::build(nodes))
    }

    #[test]
    fn test_linear_chain() {
        // A <- B <- C
        let result = run(&[node(1, 0, &[]), node(2, 1, &[1]), node(3, 2, &[2])]);
        assert_eq!(result.order, vec![1, 2, 3]);
        assert!(!result.has_cycles());
    }

    #[test]
    fn test_chain_reversed_seeds() {
        let result = run(&[node(1, 2, &[]), node(2, 1, &[1]), node(3, 0, &[2])]);
        assert_eq!(result.order, vec![1, 2, 3]);
    }

    #[test]
    fn test_diamond_uses_seed_between_branches() {
        let result = run(&[
            node(1, 0, &[]),
            node(2, 3, &[1]),
            node(3, 1, &[1]),
            node(4, 2, &[2, 3]),
        ]);
        assert_eq!(result.order, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_idempotent_on_legal_order() {
        let nodes = vec![
            node(10, 0, &[]),
            node(11, 1, &[]),
            node(12, 2, &[10]),
            node(13, 3, &[11, 12]),
        ];
        let result = run(&nodes);
        assert_eq!(result.order, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_violated_edge_moves_only_the_dependent() {
        // Legal order A B C D E, then B gains a dependency on D
        let nodes = vec![
            node(1, 0, &[]),
            node(2, 1, &[4]),
            node(3, 2, &[]),
            node(4, 3, &[]),
            node(5, 4, &[]),
        ];
        let result = run(&nodes);
        assert_eq!(result.order, vec![1, 3, 4, 2, 5]);
    }

    #[test]
    fn test_two_cycle_is_broken_deterministically() {
        let nodes = vec![node(1, 0, &[2]), node(2, 0, &[1])];
        let first = run(&nodes);
        let second = run(&nodes);

        assert_eq!(first.order, vec![1, 2]);
        assert_eq!(first.broken_edges, vec![(1, 2)]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cycle_with_tail() {
        // 1 -> 2 -> 3 -> 1 cycle, 4 depends on 3, 5 independent
        let nodes = vec![
            node(1, 1, &[3]),
            node(2, 2, &[1]),
            node(3, 3, &[2]),
            node(4, 0, &[3]),
            node(5, 4, &[]),
        ];
        let result = run(&nodes);

        assert_eq!(result.order.len(), 5);
        // 5 is the only ready task, then the cycle is forced open at its lowest key
        assert_eq!(result.order, vec![5, 1, 2, 3, 4]);
        assert_eq!(result.broken_edges, vec![(1, 3)]);
    }

    #[test]
    fn test_remaining_components_skip_placed_tasks() {
        // Two cycles {1, 2} and {3, 4}, 5 hangs off the second
        let nodes = vec![
            node(1, 0, &[2]),
            node(2, 1, &[1]),
            node(3, 2, &[4]),
            node(4, 3, &[3]),
            node(5, 4, &[4]),
        ];
        let graph = DependencyGraph::build(&nodes);

        let mut components: Vec<Vec<TaskId>> = remaining_components(&graph, &HashSet::new())
            .into_iter()
            .map(|mut c| {
                c.sort_unstable();
                c
            })
            .collect();
        components.sort();
        assert_eq!(components, vec![vec![1, 2], vec![3, 4], vec![5]]);

        let placed: HashSet<TaskId> = [1, 2, 4].into_iter().collect();
        let mut left: Vec<Vec<TaskId>> = remaining_components(&graph, &placed);
        left.sort();
        assert_eq!(left, vec![vec![3], vec![5]]);
    }

    #[test]
    fn test_two_disjoint_cycles_break_one_edge_each() {
        let nodes = vec![
            node(1, 0, &[2]),
            node(2, 1, &[1]),
            node(3, 2, &[4]),
            node(4, 3, &[3]),
        ];
        let result = run(&nodes);
        assert_eq!(result.order, vec![1, 2, 3, 4]);
        assert_eq!(result.broken_edges, vec![(1, 2), (3, 4)]);
    }

    #[test]
    fn test_self_edge_does_not_block() {
        let result = run(&[node(1, 0, &[1]), node(2, 1, &[])]);
        assert_eq!(result.order, vec![1, 2]);
        assert!(!result.has_cycles());
    }

    #[test]
    fn test_dangling_dependency_ignored() {
        let result = run(&[node(1, 1, &[99]), node(2, 0, &[])]);
        assert_eq!(result.order, vec![2, 1]);
    }

    #[test]
    fn test_created_at_breaks_seed_ties() {
        let mut older = node(2, 0, &[]);
        older.created_at = epoch() - Duration::hours(1);
        let newer = node(1, 0, &[]);

        let result = run(&[newer, older]);
        assert_eq!(result.order, vec![2, 1]);
    }

    #[test]
    fn test_disconnected_components_interleave_by_seed() {
        let result = run(&[
            node(1, 0, &[]),
            node(2, 2, &[1]),
            node(3, 1, &[]),
            node(4, 3, &[3]),
        ]);
        assert_eq!(result.order, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_detect_order_conflicts() {
        let nodes = vec![node(1, 0, &[2]), node(2, 1, &[])];
        let graph = DependencyGraph::build(&nodes);

        let conflicts = detect_order_conflicts(&nodes, &graph);
        assert_eq!(
            conflicts,
            vec![OrderConflict {
                task_id: 1,
                task_order: 0,
                dep_id: 2,
                dep_order: 1,
            }]
        );
    }
}
