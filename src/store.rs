//! The boundary between the scheduler and storage.
//!
//! The engine never talks to a database. It loads a project snapshot through
//! a [`SnapshotProvider`], computes, and hands back one [`SaveBatch`] that the
//! provider must apply atomically.

use crate::error::{Result, TaskError};
use crate::models::{Task, TaskId};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

/// Everything one mutation writes, applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveBatch {
    pub upserts: Vec<Task>,
    pub deletes: Vec<TaskId>,
}

impl SaveBatch {
    pub fn upsert(tasks: Vec<Task>) -> Self {
        SaveBatch {
            upserts: tasks,
            deletes: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Loads and persists task snapshots
pub trait SnapshotProvider: Send + Sync {
    type Session<'a>: ProjectSession
    where
        Self: 'a;

    /// Open an exclusive read-modify-write section for `project`.
    ///
    /// Other writers of the same store wait until the session is committed
    /// or dropped, including writers in other processes for shared stores.
    fn begin(&self, project: &str) -> impl Future<Output = Result<Self::Session<'_>>> + Send;

    /// All tasks of one project, in any order
    fn load_project_tasks(&self, project: &str) -> impl Future<Output = Result<Vec<Task>>> + Send;

    fn get_task(&self, id: TaskId) -> impl Future<Output = Result<Option<Task>>> + Send;

    /// Look up tasks by id across all projects. Unknown ids are skipped.
    fn get_tasks(&self, ids: &[TaskId]) -> impl Future<Output = Result<Vec<Task>>> + Send;

    fn list_projects(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// One load, compute, save cycle.
///
/// Nothing is persisted until [`ProjectSession::commit`]. Dropping the
/// session discards every write it made.
pub trait ProjectSession: Send {
    fn project(&self) -> &str;

    /// All tasks of the session's project
    fn load(&mut self) -> impl Future<Output = Result<Vec<Task>>> + Send;

    /// Cross-project lookup as seen from inside the session
    fn get_tasks(&mut self, ids: &[TaskId]) -> impl Future<Output = Result<Vec<Task>>> + Send;

    /// Reserve a fresh task id
    fn allocate_task_id(&mut self) -> impl Future<Output = Result<TaskId>> + Send;

    /// Apply a batch atomically and end the session. On error nothing from
    /// the session is visible.
    fn commit(self, batch: SaveBatch) -> impl Future<Output = Result<()>> + Send;
}

/// In-process store, used by tests and embedders
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: Mutex<BTreeMap<TaskId, Task>>,
    next_id: AtomicI64,
    latency: Option<Duration>,
    fail_next_load: AtomicBool,
    fail_next_save: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate storage round-trips taking `latency`
    pub fn with_latency(latency: Duration) -> Self {
        MemoryStore {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Pre-populate the store, bypassing the scheduler
    pub fn insert(&self, tasks: impl IntoIterator<Item = Task>) -> Result<()> {
        let mut map = self.lock()?;
        for task in tasks {
            self.next_id.fetch_max(task.id, Ordering::SeqCst);
            map.insert(task.id, task);
        }
        Ok(())
    }

    /// Every stored task ordered by id
    pub fn snapshot(&self) -> Result<Vec<Task>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    pub fn fail_next_load(&self) {
        self.fail_next_load.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Number of batches applied successfully
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<TaskId, Task>>> {
        self.tasks
            .lock()
            .map_err(|_| TaskError::Storage("memory store lock poisoned".to_string()))
    }

    fn project_tasks(&self, project: &str) -> Result<Vec<Task>> {
        if self.fail_next_load.swap(false, Ordering::SeqCst) {
            return Err(TaskError::Storage("injected load failure".to_string()));
        }
        Ok(self
            .lock()?
            .values()
            .filter(|t| t.project == project)
            .cloned()
            .collect())
    }

    fn find(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        let map = self.lock()?;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    async fn round_trip(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

impl SnapshotProvider for MemoryStore {
    type Session<'a> = MemorySession<'a>;

    async fn begin(&self, project: &str) -> Result<MemorySession<'_>> {
        Ok(MemorySession {
            store: self,
            project: project.to_string(),
        })
    }

    async fn load_project_tasks(&self, project: &str) -> Result<Vec<Task>> {
        self.round_trip().await;
        self.project_tasks(project)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.round_trip().await;
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn get_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        self.round_trip().await;
        self.find(ids)
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let projects: BTreeSet<String> = self.lock()?.values().map(|t| t.project.clone()).collect();
        Ok(projects.into_iter().collect())
    }
}

/// Session over a [`MemoryStore`].
///
/// Exclusivity comes from the caller's project lock. Ids reserved by a
/// discarded session are not handed out again.
#[derive(Debug)]
pub struct MemorySession<'a> {
    store: &'a MemoryStore,
    project: String,
}

impl ProjectSession for MemorySession<'_> {
    fn project(&self) -> &str {
        &self.project
    }

    async fn load(&mut self) -> Result<Vec<Task>> {
        self.store.round_trip().await;
        self.store.project_tasks(&self.project)
    }

    async fn get_tasks(&mut self, ids: &[TaskId]) -> Result<Vec<Task>> {
        self.store.round_trip().await;
        self.store.find(ids)
    }

    async fn allocate_task_id(&mut self) -> Result<TaskId> {
        Ok(self.store.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn commit(self, batch: SaveBatch) -> Result<()> {
        let store = self.store;
        store.round_trip().await;
        if store.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(TaskError::Storage("injected save failure".to_string()));
        }
        let mut map = store.lock()?;
        for id in &batch.deletes {
            map.remove(id);
        }
        for task in batch.upserts {
            map.insert(task.id, task);
        }
        store.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
