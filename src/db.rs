use crate::error::{Result, TaskError};
use crate::models::{DependencyRef, Status, Task, TaskId, normalize_dependencies};
use crate::store::{ProjectSession, SaveBatch, SnapshotProvider};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const NEXT_TASK_ID_KEY: &str = "next_task_id";

const TASK_COLUMNS: &str = "id, project, title, description, status, dependencies,
                            execution_order, created_at, updated_at";

/// How long a writer waits for another process to release the database
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed snapshot provider
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open database connection
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Dependencies are a JSON array on the task row. No foreign keys:
        // references to deleted tasks must survive.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                project TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'in_progress', 'completed', 'blocked')),
                dependencies TEXT NOT NULL DEFAULT '[]',
                execution_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_project_order ON tasks(project, execution_order)",
            [],
        )?;

        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self.conn.lock().await.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='tasks'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl SnapshotProvider for SqliteStore {
    type Session<'a> = SqliteSession<'a>;

    async fn begin(&self, project: &str) -> Result<SqliteSession<'_>> {
        let conn = self.conn.lock().await;
        // Takes the write lock up front so a concurrent writer in another
        // process waits on the busy timeout instead of failing at commit
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteSession {
            conn,
            project: project.to_string(),
            finished: false,
        })
    }

    async fn load_project_tasks(&self, project: &str) -> Result<Vec<Task>> {
        project_tasks(&*self.conn.lock().await, project)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                task_from_row,
            )
            .optional()
            .map_err(into_task_error)
    }

    async fn get_tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        tasks_by_id(&*self.conn.lock().await, ids)
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT DISTINCT project FROM tasks ORDER BY project")?;
        let projects = stmt.query_map([], |row| row.get::<_, String>(0))?;
        projects
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.into())
    }
}

/// An open `BEGIN IMMEDIATE` transaction on the store's connection.
///
/// Id allocation and the batch land in the same transaction, so a failed
/// mutation leaves neither a written task nor a consumed id behind.
pub struct SqliteSession<'a> {
    conn: MutexGuard<'a, Connection>,
    project: String,
    finished: bool,
}

impl ProjectSession for SqliteSession<'_> {
    fn project(&self) -> &str {
        &self.project
    }

    async fn load(&mut self) -> Result<Vec<Task>> {
        project_tasks(&self.conn, &self.project)
    }

    async fn get_tasks(&mut self, ids: &[TaskId]) -> Result<Vec<Task>> {
        tasks_by_id(&self.conn, ids)
    }

    async fn allocate_task_id(&mut self) -> Result<TaskId> {
        let stored = read_config(&self.conn, NEXT_TASK_ID_KEY)?;
        let max_existing: TaskId =
            self.conn
                .query_row("SELECT COALESCE(MAX(id), 0) FROM tasks", [], |row| {
                    row.get(0)
                })?;

        let next = stored
            .and_then(|v| v.parse::<TaskId>().ok())
            .unwrap_or(1)
            .max(max_existing + 1);

        write_config(&self.conn, NEXT_TASK_ID_KEY, &(next + 1).to_string())?;
        Ok(next)
    }

    async fn commit(mut self, batch: SaveBatch) -> Result<()> {
        for id in &batch.deletes {
            self.conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        }

        for task in &batch.upserts {
            let dependencies = serde_json::to_string(&task.dependencies)?;
            self.conn.execute(
                "INSERT INTO tasks (id, project, title, description, status, dependencies,
                                    execution_order, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    project = excluded.project,
                    title = excluded.title,
                    description = excluded.description,
                    status = excluded.status,
                    dependencies = excluded.dependencies,
                    execution_order = excluded.execution_order,
                    updated_at = excluded.updated_at",
                params![
                    task.id,
                    task.project,
                    task.title,
                    task.description,
                    task.status.as_str(),
                    dependencies,
                    task.execution_order,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )?;
        }

        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        debug!(
            project = %self.project,
            upserts = batch.upserts.len(),
            deletes = batch.deletes.len(),
            "saved task batch"
        );
        Ok(())
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(project = %self.project, error = %e, "rollback failed");
        }
    }
}

fn project_tasks(conn: &Connection, project: &str) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE project = ?1 ORDER BY execution_order, id"
    ))?;
    let tasks = stmt.query_map([project], task_from_row)?;
    tasks
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(into_task_error)
}

fn tasks_by_id(conn: &Connection, ids: &[TaskId]) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
    let mut found = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(task) = stmt
            .query_row([id], task_from_row)
            .optional()
            .map_err(into_task_error)?
        {
            found.push(task);
        }
    }
    Ok(found)
}

fn read_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(|e| e.into())
}

fn write_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
        (key, value),
    )?;
    Ok(())
}

fn conversion_error(column: usize, err: TaskError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

/// Surface row decoding failures as the domain error they carry
fn into_task_error(err: rusqlite::Error) -> TaskError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(column, ty, inner) => {
            match inner.downcast::<TaskError>() {
                Ok(task_error) => *task_error,
                Err(inner) => {
                    TaskError::Db(rusqlite::Error::FromSqlConversionFailure(column, ty, inner))
                }
            }
        }
        other => TaskError::Db(other),
    }
}

fn task_from_row(row: &Row) -> std::result::Result<Task, rusqlite::Error> {
    let status_str: String = row.get(4)?;
    let status = Status::try_from(status_str.as_str())
        .map_err(|_| conversion_error(4, TaskError::InvalidStatus(status_str.clone())))?;

    let deps_json: String = row.get(5)?;
    let refs: Vec<DependencyRef> =
        serde_json::from_str(&deps_json).map_err(|e| conversion_error(5, e.into()))?;

    Ok(Task {
        id: row.get(0)?,
        project: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status,
        dependencies: normalize_dependencies(refs),
        execution_order: row.get(6)?,
        created_at: parse_datetime(row.get(7)?)?,
        updated_at: parse_datetime(row.get(8)?)?,
    })
}

fn parse_datetime(s: String) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Then try naive datetime formats (assume UTC)
    if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(DateTime::from_naive_utc_and_offset(ndt, Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(ndt, Utc));
    }
    Err(conversion_error(
        7,
        TaskError::Storage(format!("Invalid datetime: {s}")),
    ))
}
