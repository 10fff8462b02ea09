//! Manual reordering.
//!
//! A proposed order never becomes the execution order directly. It only
//! reseeds the tie-break keys for a fresh resolution, so the result is legal
//! no matter what the caller asked for.

use crate::error::{Result, TaskError};
use crate::graph::DependencyGraph;
use crate::models::{Task, TaskId, TaskNode};
use crate::order::{self, Resolution, TieBreakKey};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Outcome of legalizing a proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Legalized {
    /// Fewer than two known ids: nothing to do
    Unchanged,
    Reordered(Resolution),
}

/// Turn a proposed (possibly partial, possibly illegal) order into the closest legal order
pub fn legalize(snapshot: &[TaskNode], proposal: &[TaskId]) -> Result<Legalized> {
    let mut seen: HashSet<TaskId> = HashSet::with_capacity(proposal.len());
    for &id in proposal {
        if !seen.insert(id) {
            return Err(TaskError::DuplicateReorderId(id));
        }
    }

    let mut keys: HashMap<TaskId, TieBreakKey> = HashMap::with_capacity(snapshot.len());
    for node in snapshot {
        keys.entry(node.id).or_insert_with(|| TieBreakKey::of(node));
    }

    // The caller's view may be stale
    let known: Vec<TaskId> = proposal
        .iter()
        .copied()
        .filter(|id| keys.contains_key(id))
        .collect();
    if known.len() < 2 {
        debug!(
            proposed = proposal.len(),
            known = known.len(),
            "reorder proposal too small, leaving order unchanged"
        );
        return Ok(Legalized::Unchanged);
    }

    // Rank the current keys so every task holds a distinct seed in 0..N
    let mut ranked: Vec<TieBreakKey> = keys.values().copied().collect();
    ranked.sort();
    let mut seeds: HashMap<TaskId, i64> = ranked
        .iter()
        .enumerate()
        .map(|(rank, key)| (key.id, rank as i64))
        .collect();

    if known.len() == keys.len() {
        for (position, &id) in known.iter().enumerate() {
            seeds.insert(id, position as i64);
        }
    } else {
        // Proposed tasks trade places among their own slots only
        let mut slots: Vec<i64> = known.iter().map(|id| seeds[id]).collect();
        slots.sort_unstable();
        for (&id, slot) in known.iter().zip(slots) {
            seeds.insert(id, slot);
        }
    }

    for (id, key) in keys.iter_mut() {
        key.seed = seeds[id];
    }

    let graph = DependencyGraph::build(snapshot);
    Ok(Legalized::Reordered(order::resolve_with_keys(&graph, &keys)))
}

/// Legalize a proposal against full task records, updating `execution_order` in place.
///
/// Returns the ids whose order changed; empty when the proposal was a no-op.
pub fn legalize_tasks(tasks: &mut [Task], proposal: &[TaskId]) -> Result<Vec<TaskId>> {
    let nodes: Vec<TaskNode> = tasks.iter().map(Task::node).collect();
    match legalize(&nodes, proposal)? {
        Legalized::Unchanged => Ok(vec![]),
        Legalized::Reordered(resolution) => {
            Ok(order::assign_execution_order(tasks, &resolution))
        }
    }
}
