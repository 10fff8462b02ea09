use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use taskdag::gate::{self, MissingDependencyPolicy};
use taskdag::graph::DependencyGraph;
use taskdag::order::{self, Resolution};
use taskdag::reorder::{self, Legalized};
use taskdag::{Status, TaskId, TaskNode};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn status_strategy() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Pending),
        Just(Status::InProgress),
        Just(Status::Completed),
        Just(Status::Blocked),
    ]
}

// Arbitrary graphs: self edges, cycles and dangling ids (beyond `n`) allowed.
fn snapshot_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<TaskNode>> {
    (1..=max_tasks).prop_flat_map(|n| {
        let max_ref = n as TaskId + 3;
        proptest::collection::vec(
            (
                proptest::collection::btree_set(1..=max_ref, 0..4),
                0..(n as i64 * 2),
                0..5i64,
                status_strategy(),
            ),
            n,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (dependencies, seed, minutes, status))| TaskNode {
                    id: i as TaskId + 1,
                    dependencies,
                    status,
                    execution_order: seed,
                    created_at: base_time() + Duration::minutes(minutes),
                })
                .collect()
        })
    })
}

// Acyclic graphs: task N only depends on tasks 1..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<TaskNode>> {
    snapshot_strategy(max_tasks).prop_map(|mut nodes| {
        for node in &mut nodes {
            let id = node.id;
            node.dependencies.retain(|&dep| dep < id);
        }
        nodes
    })
}

fn resolve(nodes: &[TaskNode]) -> Resolution {
    order::resolve(nodes, &DependencyGraph::build(nodes))
}

fn positions(order: &[TaskId]) -> HashMap<TaskId, usize> {
    order.iter().enumerate().map(|(i, &id)| (id, i)).collect()
}

fn with_seeds_from(nodes: &[TaskNode], order: &[TaskId]) -> Vec<TaskNode> {
    let pos = positions(order);
    nodes
        .iter()
        .cloned()
        .map(|mut node| {
            node.execution_order = pos[&node.id] as i64;
            node
        })
        .collect()
}

proptest! {
    #[test]
    fn test_order_is_permutation(nodes in snapshot_strategy(12)) {
        let resolution = resolve(&nodes);

        let mut sorted = resolution.order.clone();
        sorted.sort_unstable();
        let expected: Vec<TaskId> = nodes.iter().map(|n| n.id).collect();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn test_dependencies_come_first_unless_broken(nodes in snapshot_strategy(12)) {
        let resolution = resolve(&nodes);
        let pos = positions(&resolution.order);
        let broken: HashSet<(TaskId, TaskId)> = resolution.broken_edges.iter().copied().collect();

        for node in &nodes {
            for &dep in &node.dependencies {
                if dep == node.id || !pos.contains_key(&dep) || broken.contains(&(node.id, dep)) {
                    continue;
                }
                prop_assert!(
                    pos[&dep] < pos[&node.id],
                    "#{} placed before its dependency #{}", node.id, dep
                );
            }
        }
    }

    #[test]
    fn test_acyclic_graphs_break_nothing(nodes in dag_strategy(12)) {
        prop_assert!(resolve(&nodes).broken_edges.is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent(nodes in dag_strategy(12)) {
        let first = resolve(&nodes);
        let second = resolve(&with_seeds_from(&nodes, &first.order));
        prop_assert_eq!(first.order, second.order);
    }

    #[test]
    fn test_valid_order_is_kept(nodes in dag_strategy(12)) {
        // Seeds already follow id order, which is topological here
        let ids: Vec<TaskId> = nodes.iter().map(|n| n.id).collect();
        let seeded = with_seeds_from(&nodes, &ids);
        prop_assert_eq!(resolve(&seeded).order, ids);
    }

    #[test]
    fn test_input_order_does_not_matter(nodes in snapshot_strategy(12), rotate in 0..12usize) {
        let mut shuffled = nodes.clone();
        shuffled.reverse();
        let len = shuffled.len();
        shuffled.rotate_left(rotate % len);

        prop_assert_eq!(resolve(&nodes), resolve(&shuffled));
    }

    #[test]
    fn test_legal_full_proposal_is_applied_verbatim(nodes in dag_strategy(10), seeds in proptest::collection::vec(0..100i64, 10)) {
        // Any topological order of the graph is a legal proposal
        let mut reseeded = nodes.clone();
        for (node, seed) in reseeded.iter_mut().zip(seeds) {
            node.execution_order = seed;
        }
        let proposal = resolve(&reseeded).order;

        match reorder::legalize(&nodes, &proposal).unwrap() {
            Legalized::Reordered(resolution) => prop_assert_eq!(resolution.order, proposal),
            Legalized::Unchanged => prop_assert!(nodes.len() < 2),
        }
    }

    #[test]
    fn test_legalized_order_respects_dependencies(
        nodes in snapshot_strategy(10),
        proposal in proptest::collection::hash_set(1..14 as TaskId, 0..10),
    ) {
        let proposal: Vec<TaskId> = proposal.into_iter().collect();
        if let Legalized::Reordered(resolution) = reorder::legalize(&nodes, &proposal).unwrap() {
            let pos = positions(&resolution.order);
            let broken: HashSet<(TaskId, TaskId)> = resolution.broken_edges.iter().copied().collect();
            prop_assert_eq!(resolution.order.len(), nodes.len());
            for node in &nodes {
                for &dep in &node.dependencies {
                    if dep == node.id || !pos.contains_key(&dep) || broken.contains(&(node.id, dep)) {
                        continue;
                    }
                    prop_assert!(pos[&dep] < pos[&node.id]);
                }
            }
        }
    }

    #[test]
    fn test_gate_requires_completed_dependencies(
        nodes in snapshot_strategy(10),
        ignore_missing in any::<bool>(),
    ) {
        let policy = if ignore_missing {
            MissingDependencyPolicy::Ignore
        } else {
            MissingDependencyPolicy::Block
        };
        let statuses: HashMap<TaskId, Status> = nodes.iter().map(|n| (n.id, n.status)).collect();

        for node in &nodes {
            let report = gate::check(node, &statuses, policy);
            let satisfied = node.dependencies.iter().all(|dep| {
                *dep == node.id
                    || match statuses.get(dep) {
                        Some(status) => *status == Status::Completed,
                        None => ignore_missing,
                    }
            });
            let expected = node.status != Status::Completed && satisfied;
            prop_assert_eq!(report.executable, expected);
            prop_assert!(report.blocked_by.iter().all(|dep| node.dependencies.contains(dep)));
        }
    }
}
