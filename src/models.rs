use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque task identifier, stable for the lifetime of a task
pub type TaskId = i64;

/// Task status in the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Blocked => "blocked",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Status::Completed => "✓",
            Status::InProgress => "●",
            Status::Pending => "○",
            Status::Blocked => "✗",
        }
    }

    /// Only a completed task satisfies a dependency
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Status {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Status::Pending),
            "in_progress" | "in-progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            "blocked" => Ok(Status::Blocked),
            _ => Err(format!("Invalid status: {s}")),
        }
    }
}

/// A dependency entry as it may appear in stored or imported records.
///
/// Older records carry `{"taskId": 3}` objects, newer ones bare ids. Both are
/// accepted on read and normalised away before the scheduler sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRef {
    Id(TaskId),
    Object {
        #[serde(rename = "taskId", alias = "task_id")]
        task_id: TaskId,
    },
}

impl DependencyRef {
    pub fn task_id(&self) -> TaskId {
        match self {
            DependencyRef::Id(id) => *id,
            DependencyRef::Object { task_id } => *task_id,
        }
    }
}

/// Collapse any mix of dependency representations into a sorted, deduplicated id list
pub fn normalize_dependencies<I>(refs: I) -> Vec<TaskId>
where
    I: IntoIterator<Item = DependencyRef>,
{
    refs.into_iter()
        .map(|r| r.task_id())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// A task in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    /// May reference deleted tasks, tasks of other projects, or the task itself
    pub dependencies: Vec<TaskId>,
    pub execution_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Projection consumed by the ordering engine
    pub fn node(&self) -> TaskNode {
        TaskNode {
            id: self.id,
            dependencies: self.dependencies.iter().copied().collect(),
            status: self.status,
            execution_order: self.execution_order,
            created_at: self.created_at,
        }
    }

    pub fn depends_on(&self, id: TaskId) -> bool {
        self.dependencies.contains(&id)
    }
}

/// The slice of a task the graph, order and gate modules work on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: TaskId,
    pub dependencies: BTreeSet<TaskId>,
    pub status: Status,
    pub execution_order: i64,
    pub created_at: DateTime<Utc>,
}

/// New task input
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub dependencies: Vec<TaskId>,
}

/// Task update input
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    /// Replaces the whole dependency set when present
    pub dependencies: Option<Vec<TaskId>>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.dependencies.is_none()
    }
}

/// Dependency info with task status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub id: TaskId,
    pub title: Option<String>,
    /// `None` when the referenced task no longer exists
    pub status: Option<Status>,
}

/// Full task details including dependencies and dependents
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub dependency_info: Vec<DependencyInfo>,
    pub dependents: Vec<TaskId>,
}

/// Order conflict warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderConflict {
    pub task_id: TaskId,
    pub task_order: i64,
    pub dep_id: TaskId,
    pub dep_order: i64,
}

/// Emitted after every successful save of a project's tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TasksChanged {
    pub project: String,
}
