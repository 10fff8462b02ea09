use crate::models::TaskId;
use thiserror::Error;

/// All possible errors in the task tracker
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task #{0} not found")]
    TaskNotFound(TaskId),

    #[error("invalid reorder: duplicate id #{0}")]
    DuplicateReorderId(TaskId),

    #[error("Cannot start #{id}: dependencies not completed: {deps}", deps = format_deps(deps))]
    UnmetDependencies { id: TaskId, deps: Vec<TaskId> },

    #[error("Adding #{from} -> #{to} would create a cycle: {path}", path = format_cycle(path))]
    CycleDetected {
        from: TaskId,
        to: TaskId,
        path: Vec<TaskId>,
    },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Task #{0} is not blocked")]
    TaskNotBlocked(TaskId),

    #[error("Task #{0} is blocked")]
    TaskIsBlocked(TaskId),

    #[error("Task #{0} is already completed")]
    TaskAlreadyCompleted(TaskId),

    #[error("Task #{0} is not in progress")]
    TaskNotInProgress(TaskId),

    #[error("Dependency already exists")]
    DependencyAlreadyExists,

    #[error("Dependency not found")]
    DependencyNotFound,

    #[error("Cannot depend on self")]
    SelfDependency,

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task database not initialized. Run `taskdag init` first.")]
    NotInitialized,

    #[error("Task database already initialized")]
    AlreadyInitialized,
}

fn format_cycle(path: &[TaskId]) -> String {
    path.iter()
        .map(|id| format!("#{id}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_deps(deps: &[TaskId]) -> String {
    deps.iter()
        .map(|id| format!("#{id}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TaskError>;
