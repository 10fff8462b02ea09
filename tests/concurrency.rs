use std::sync::Arc;
use std::time::Duration;
use taskdag::db::SqliteStore;
use taskdag::{MemoryStore, NewTask, Scheduler, TaskId};
use tempfile::TempDir;

fn new_task(title: String) -> NewTask {
    NewTask {
        title,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_keep_order_dense() {
    let scheduler = Arc::new(Scheduler::new(MemoryStore::with_latency(
        Duration::from_millis(2),
    )));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .create_task("shared", new_task(format!("task {i}")))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let listing = scheduler.list_tasks("shared").await.unwrap();
    let orders: Vec<i64> = listing.tasks.iter().map(|t| t.execution_order).collect();
    assert_eq!(orders, (0..16).collect::<Vec<i64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dependency_edits_are_not_lost() {
    let scheduler = Arc::new(Scheduler::new(MemoryStore::with_latency(
        Duration::from_millis(2),
    )));
    let mut ids: Vec<TaskId> = vec![];
    for i in 0..8 {
        let task = scheduler
            .create_task("shared", new_task(format!("task {i}")))
            .await
            .unwrap();
        ids.push(task.id);
    }

    // Every task except the first depends on the first
    let root = ids[0];
    let handles: Vec<_> = ids[1..]
        .iter()
        .map(|&id| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.add_dependency(id, root).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let listing = scheduler.list_tasks("shared").await.unwrap();
    assert_eq!(listing.tasks[0].id, root);
    for task in &listing.tasks[1..] {
        assert_eq!(task.dependencies, vec![root]);
    }
    assert!(listing.order_conflicts.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_projects_progress_independently() {
    let scheduler = Arc::new(Scheduler::new(MemoryStore::with_latency(
        Duration::from_millis(2),
    )));

    let handles: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|project| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                for i in 0..5 {
                    scheduler
                        .create_task(project, new_task(format!("{project} {i}")))
                        .await?;
                }
                scheduler.recompute(project).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        scheduler.list_projects().await.unwrap(),
        vec!["alpha", "beta", "gamma"]
    );
    for project in ["alpha", "beta", "gamma"] {
        let listing = scheduler.list_tasks(project).await.unwrap();
        let orders: Vec<i64> = listing.tasks.iter().map(|t| t.execution_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
        assert!(listing.tasks.iter().all(|t| t.project == project));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_stores_on_one_database_serialize_writes() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tasks.db");
    let first = SqliteStore::open(&db_path).unwrap();
    first.init().await.unwrap();
    // Each scheduler has its own connection, as two CLI processes would
    let schedulers = [
        Arc::new(Scheduler::new(first)),
        Arc::new(Scheduler::new(SqliteStore::open(&db_path).unwrap())),
    ];

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let scheduler = Arc::clone(&schedulers[i % 2]);
            tokio::spawn(async move {
                scheduler
                    .create_task("shared", new_task(format!("task {i}")))
                    .await
            })
        })
        .collect();
    let mut ids = vec![];
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }

    ids.sort_unstable();
    assert_eq!(ids, (1..=40).collect::<Vec<TaskId>>());
    let listing = schedulers[1].list_tasks("shared").await.unwrap();
    let orders: Vec<i64> = listing.tasks.iter().map(|t| t.execution_order).collect();
    assert_eq!(orders, (0..40).collect::<Vec<i64>>());
}
