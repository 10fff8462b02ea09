use crate::error::{Result, TaskError};
use crate::gate::{self, GateReport, MissingDependencyPolicy};
use crate::graph::{self, DependencyGraph};
use crate::lock::ProjectLocks;
use crate::models::{
    DependencyInfo, NewTask, OrderConflict, Status, Task, TaskDetail, TaskId, TaskNode,
    TaskUpdate, TasksChanged,
};
use crate::order;
use crate::reorder;
use crate::store::{ProjectSession, SaveBatch, SnapshotProvider};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::broadcast;
use tracing::{debug, info};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Tasks of one project in execution order
#[derive(Debug, Clone, Serialize)]
pub struct TaskListing {
    pub project: String,
    pub tasks: Vec<Task>,
    pub order_conflicts: Vec<OrderConflict>,
}

/// Core business logic.
///
/// Every order-affecting operation runs load, compute and save while holding
/// the project's lock and inside one store session, so concurrent mutations
/// of one project never clobber each other, whether they come from this
/// process or another one sharing the store.
pub struct Scheduler<S> {
    store: S,
    locks: ProjectLocks,
    missing_dependency: MissingDependencyPolicy,
    changes: broadcast::Sender<TasksChanged>,
}

impl<S: SnapshotProvider> Scheduler<S> {
    pub fn new(store: S) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Scheduler {
            store,
            locks: ProjectLocks::new(),
            missing_dependency: MissingDependencyPolicy::default(),
            changes,
        }
    }

    pub fn with_missing_dependency_policy(mut self, policy: MissingDependencyPolicy) -> Self {
        self.missing_dependency = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Receive one event per successful save
    pub fn subscribe(&self) -> broadcast::Receiver<TasksChanged> {
        self.changes.subscribe()
    }

    // ==================== Ordering Operations ====================

    /// Full recompute of a project's execution order
    pub async fn recompute(&self, project: &str) -> Result<Vec<Task>> {
        let _guard = self.locks.acquire(project).await;
        let mut session = self.store.begin(project).await?;
        let tasks = session.load().await?;
        self.commit(session, tasks, &[], vec![]).await
    }

    /// Apply a user-proposed order, legalized against the dependency graph
    pub async fn reorder(&self, project: &str, proposal: &[TaskId]) -> Result<Vec<Task>> {
        let _guard = self.locks.acquire(project).await;
        let mut session = self.store.begin(project).await?;
        let mut tasks = session.load().await?;

        let changed = reorder::legalize_tasks(&mut tasks, proposal)?;
        if changed.is_empty() {
            debug!(project, "reorder left the order unchanged");
            sort_by_order(&mut tasks);
            return Ok(tasks);
        }

        let upserts: Vec<Task> = tasks
            .iter()
            .filter(|t| changed.contains(&t.id))
            .cloned()
            .collect();
        self.save(session, SaveBatch::upsert(upserts)).await?;
        info!(project, moved = changed.len(), "reordered tasks");

        sort_by_order(&mut tasks);
        Ok(tasks)
    }

    /// Whether a task may leave `pending` right now
    pub async fn can_execute(&self, id: TaskId) -> Result<GateReport> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or(TaskError::TaskNotFound(id))?;
        let remote = self.store.get_tasks(&task.dependencies).await?;
        Ok(self.gate(&task, &remote))
    }

    // ==================== Task Operations ====================

    /// Create a new task at the end of its project's order
    pub async fn create_task(&self, project: &str, new: NewTask) -> Result<Task> {
        let _guard = self.locks.acquire(project).await;
        let mut session = self.store.begin(project).await?;
        let mut tasks = session.load().await?;

        let id = session.allocate_task_id().await?;
        let now = Utc::now();
        let dependencies: Vec<TaskId> = new
            .dependencies
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        tasks.push(Task {
            id,
            project: project.to_string(),
            title: new.title,
            description: new.description,
            status: Status::Pending,
            dependencies,
            execution_order: tasks.len() as i64,
            created_at: now,
            updated_at: now,
        });

        let tasks = self.commit(session, tasks, &[id], vec![]).await?;
        info!(project, id, "created task");
        take_task(tasks, id)
    }

    /// Get a task with dependency and dependent details
    pub async fn get_task(&self, id: TaskId) -> Result<TaskDetail> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or(TaskError::TaskNotFound(id))?;

        let found: HashMap<TaskId, Task> = self
            .store
            .get_tasks(&task.dependencies)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        let dependency_info = task
            .dependencies
            .iter()
            .map(|dep| DependencyInfo {
                id: *dep,
                title: found.get(dep).map(|t| t.title.clone()),
                status: found.get(dep).map(|t| t.status),
            })
            .collect();

        let dependents = self
            .store
            .load_project_tasks(&task.project)
            .await?
            .into_iter()
            .filter(|t| t.id != id && t.depends_on(id))
            .map(|t| t.id)
            .collect();

        Ok(TaskDetail {
            task,
            dependency_info,
            dependents,
        })
    }

    /// Update title, description or the whole dependency set.
    ///
    /// Dependency lists are stored as given; self references, stale ids and
    /// cycles are tolerated and resolved by the ordering engine.
    pub async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        self.with_task(id, |task| {
            if let Some(title) = update.title {
                task.title = title;
            }
            if let Some(description) = update.description {
                task.description = description;
            }
            if let Some(dependencies) = update.dependencies {
                task.dependencies = dependencies
                    .into_iter()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
            }
            Ok(())
        })
        .await
    }

    /// Delete a task. References to it from other tasks are kept.
    pub async fn delete_task(&self, id: TaskId) -> Result<Task> {
        let project = self.project_of(id).await?;
        let _guard = self.locks.acquire(&project).await;
        let mut session = self.store.begin(&project).await?;
        let mut tasks = session.load().await?;

        let index = tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::TaskNotFound(id))?;
        let removed = tasks.remove(index);

        self.commit(session, tasks, &[], vec![id]).await?;
        info!(project = %project, id, "deleted task");
        Ok(removed)
    }

    pub async fn list_tasks(&self, project: &str) -> Result<TaskListing> {
        let mut tasks = self.store.load_project_tasks(project).await?;
        sort_by_order(&mut tasks);

        let nodes: Vec<TaskNode> = tasks.iter().map(Task::node).collect();
        let graph = DependencyGraph::build(&nodes);
        let order_conflicts = order::detect_order_conflicts(&nodes, &graph);

        Ok(TaskListing {
            project: project.to_string(),
            tasks,
            order_conflicts,
        })
    }

    pub async fn list_projects(&self) -> Result<Vec<String>> {
        self.store.list_projects().await
    }

    // ==================== Dependency Operations ====================

    /// Add a dependency: `id` will require `depends_on` to be completed first
    pub async fn add_dependency(&self, id: TaskId, depends_on: TaskId) -> Result<Task> {
        if id == depends_on {
            return Err(TaskError::SelfDependency);
        }

        let project = self.project_of(id).await?;
        let _guard = self.locks.acquire(&project).await;
        let mut session = self.store.begin(&project).await?;
        if session.get_tasks(&[depends_on]).await?.is_empty() {
            return Err(TaskError::TaskNotFound(depends_on));
        }
        let mut tasks = session.load().await?;

        let edges: Vec<(TaskId, TaskId)> = tasks
            .iter()
            .flat_map(|t| t.dependencies.iter().map(move |&dep| (t.id, dep)))
            .collect();
        let task = find_mut(&mut tasks, id)?;
        if task.depends_on(depends_on) {
            return Err(TaskError::DependencyAlreadyExists);
        }
        if let Some(path) = graph::would_create_cycle(&edges, id, depends_on) {
            return Err(TaskError::CycleDetected {
                from: id,
                to: depends_on,
                path,
            });
        }

        task.dependencies.push(depends_on);
        task.dependencies.sort_unstable();
        task.updated_at = Utc::now();

        let tasks = self.commit(session, tasks, &[id], vec![]).await?;
        take_task(tasks, id)
    }

    pub async fn remove_dependency(&self, id: TaskId, depends_on: TaskId) -> Result<Task> {
        self.with_task(id, |task| {
            let before = task.dependencies.len();
            task.dependencies.retain(|&dep| dep != depends_on);
            if task.dependencies.len() == before {
                return Err(TaskError::DependencyNotFound);
            }
            Ok(())
        })
        .await
    }

    // ==================== Status Operations ====================

    /// Move a task to `in_progress` if the execution gate allows it
    pub async fn start_task(&self, id: TaskId) -> Result<Task> {
        let project = self.project_of(id).await?;
        let _guard = self.locks.acquire(&project).await;
        let mut session = self.store.begin(&project).await?;
        let mut tasks = session.load().await?;

        let task = find_mut(&mut tasks, id)?.clone();
        match task.status {
            Status::InProgress => return Ok(task),
            Status::Blocked => return Err(TaskError::TaskIsBlocked(id)),
            Status::Completed => return Err(TaskError::TaskAlreadyCompleted(id)),
            Status::Pending => {}
        }

        let remote = session.get_tasks(&remote_dependencies(&task, &tasks)).await?;
        let report = self.gate(&task, tasks.iter().chain(&remote));
        if !report.executable {
            return Err(TaskError::UnmetDependencies {
                id,
                deps: report.blocked_by,
            });
        }

        set_status(find_mut(&mut tasks, id)?, Status::InProgress);
        let tasks = self.commit(session, tasks, &[id], vec![]).await?;
        take_task(tasks, id)
    }

    pub async fn complete_task(&self, id: TaskId) -> Result<Task> {
        self.with_task(id, |task| match task.status {
            Status::InProgress => {
                set_status(task, Status::Completed);
                Ok(())
            }
            Status::Completed => Err(TaskError::TaskAlreadyCompleted(id)),
            _ => Err(TaskError::TaskNotInProgress(id)),
        })
        .await
    }

    /// Return an in-progress task to pending
    pub async fn stop_task(&self, id: TaskId) -> Result<Task> {
        self.with_task(id, |task| match task.status {
            Status::InProgress => {
                set_status(task, Status::Pending);
                Ok(())
            }
            _ => Err(TaskError::TaskNotInProgress(id)),
        })
        .await
    }

    /// Put a task on hold.
    ///
    /// Blocking is a manual hold, not a start, so it skips the execution gate
    /// and works on tasks whose dependencies are still open.
    pub async fn block_task(&self, id: TaskId) -> Result<Task> {
        self.with_task(id, |task| match task.status {
            Status::Completed => Err(TaskError::TaskAlreadyCompleted(id)),
            Status::Blocked => Ok(()),
            _ => {
                set_status(task, Status::Blocked);
                Ok(())
            }
        })
        .await
    }

    pub async fn unblock_task(&self, id: TaskId) -> Result<Task> {
        self.with_task(id, |task| match task.status {
            Status::Blocked => {
                set_status(task, Status::Pending);
                Ok(())
            }
            _ => Err(TaskError::TaskNotBlocked(id)),
        })
        .await
    }

    // ==================== Helper Methods ====================

    async fn project_of(&self, id: TaskId) -> Result<String> {
        self.store
            .get_task(id)
            .await?
            .map(|t| t.project)
            .ok_or(TaskError::TaskNotFound(id))
    }

    /// Lock the task's project, apply `edit` to the fresh copy, recompute and save
    async fn with_task<F>(&self, id: TaskId, edit: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let project = self.project_of(id).await?;
        let _guard = self.locks.acquire(&project).await;
        let mut session = self.store.begin(&project).await?;
        let mut tasks = session.load().await?;

        let task = find_mut(&mut tasks, id)?;
        let before = task.clone();
        edit(task)?;
        if *task == before {
            // Nothing to write
            sort_by_order(&mut tasks);
            return take_task(tasks, id);
        }
        task.updated_at = Utc::now();

        let tasks = self.commit(session, tasks, &[id], vec![]).await?;
        take_task(tasks, id)
    }

    /// Gate check against the statuses of `known` tasks
    fn gate<'t>(&self, task: &Task, known: impl IntoIterator<Item = &'t Task>) -> GateReport {
        let statuses: HashMap<TaskId, Status> = known
            .into_iter()
            .filter(|t| task.depends_on(t.id))
            .map(|t| (t.id, t.status))
            .collect();

        let report = gate::check(&task.node(), &statuses, self.missing_dependency);
        debug!(
            id = task.id,
            executable = report.executable,
            blocked_by = ?report.blocked_by,
            "execution gate"
        );
        report
    }

    /// Recompute the order of `tasks` and save everything that changed in one batch.
    ///
    /// `touched` lists tasks whose content was edited by the caller.
    /// An empty batch ends the session without writing.
    async fn commit<'s>(
        &'s self,
        session: S::Session<'s>,
        mut tasks: Vec<Task>,
        touched: &[TaskId],
        deletes: Vec<TaskId>,
    ) -> Result<Vec<Task>> {
        let (resolution, reordered) = order::recompute(&mut tasks);
        if resolution.has_cycles() {
            debug!(
                project = session.project(),
                broken = ?resolution.broken_edges,
                "stored dependencies contain cycles"
            );
        }

        let upserts: Vec<Task> = tasks
            .iter()
            .filter(|t| touched.contains(&t.id) || reordered.contains(&t.id))
            .cloned()
            .collect();
        let batch = SaveBatch { upserts, deletes };
        if !batch.is_empty() {
            self.save(session, batch).await?;
        }

        sort_by_order(&mut tasks);
        Ok(tasks)
    }

    async fn save<'s>(&'s self, session: S::Session<'s>, batch: SaveBatch) -> Result<()> {
        let project = session.project().to_string();
        let written = batch.upserts.len() + batch.deletes.len();
        session.commit(batch).await?;
        debug!(project = %project, written, "persisted project snapshot");

        // No receivers is fine
        let _ = self.changes.send(TasksChanged { project });
        Ok(())
    }
}

/// Dependencies of `task` that are not among `local`
fn remote_dependencies(task: &Task, local: &[Task]) -> Vec<TaskId> {
    task.dependencies
        .iter()
        .copied()
        .filter(|dep| !local.iter().any(|t| t.id == *dep))
        .collect()
}

fn set_status(task: &mut Task, status: Status) {
    task.status = status;
}

fn sort_by_order(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| (t.execution_order, t.id));
}

fn find_mut(tasks: &mut [Task], id: TaskId) -> Result<&mut Task> {
    tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or(TaskError::TaskNotFound(id))
}

fn take_task(tasks: Vec<Task>, id: TaskId) -> Result<Task> {
    tasks
        .into_iter()
        .find(|t| t.id == id)
        .ok_or(TaskError::TaskNotFound(id))
}
