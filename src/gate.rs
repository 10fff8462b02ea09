//! Executability check for a single task.
//!
//! Depends only on dependency *status*; the execution order plays no part.

use crate::models::{Status, TaskId, TaskNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a dependency on a task that cannot be found is treated
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MissingDependencyPolicy {
    /// Report the missing id as blocking so the integrity problem is visible
    #[default]
    Block,
    /// Skip the missing id and judge the remaining dependencies only
    Ignore,
}

impl MissingDependencyPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "block" => Some(MissingDependencyPolicy::Block),
            "ignore" => Some(MissingDependencyPolicy::Ignore),
            _ => None,
        }
    }
}

impl fmt::Display for MissingDependencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingDependencyPolicy::Block => write!(f, "block"),
            MissingDependencyPolicy::Ignore => write!(f, "ignore"),
        }
    }
}

/// Gate verdict for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateReport {
    pub executable: bool,
    pub blocked_by: Vec<TaskId>,
}

/// Check whether `task` may leave `pending`.
///
/// `statuses` holds the current status of every dependency that could be
/// found, in any project.
pub fn check(
    task: &TaskNode,
    statuses: &HashMap<TaskId, Status>,
    policy: MissingDependencyPolicy,
) -> GateReport {
    // A completed task cannot be executed again
    if task.status.is_terminal() {
        return GateReport {
            executable: false,
            blocked_by: vec![],
        };
    }

    let blocked_by: Vec<TaskId> = task
        .dependencies
        .iter()
        .copied()
        .filter(|&dep| dep != task.id)
        .filter(|dep| match statuses.get(dep) {
            Some(status) => !status.is_terminal(),
            None => policy == MissingDependencyPolicy::Block,
        })
        .collect();

    GateReport {
        executable: blocked_by.is_empty(),
        blocked_by,
    }
}
