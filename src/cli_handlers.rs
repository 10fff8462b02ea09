use crate::config::Config;
use crate::core::{Scheduler, TaskListing};
use crate::db::SqliteStore;
use crate::error::{Result, TaskError};
use crate::models::{NewTask, Status, Task, TaskUpdate};
use std::collections::HashMap;
use tracing::debug;

/// Handle the init command
pub async fn handle_init(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    if store.is_initialized().await? {
        return Err(TaskError::AlreadyInitialized);
    }
    store.init().await?;

    println!("Initialized task database");
    println!("  - Created: {}", config.db_path.display());

    Ok(())
}

/// Handle the add command
pub async fn handle_add(
    config: &Config,
    title: &str,
    desc: Option<&str>,
    deps: Vec<i64>,
) -> Result<()> {
    let scheduler = open(config).await?;

    let task = scheduler
        .create_task(
            &config.project,
            NewTask {
                title: title.to_string(),
                description: desc.map(str::to_string),
                dependencies: deps,
            },
        )
        .await?;

    println!("Created task #{}: {}", task.id, task.title);
    println!("  Order: {}", task.execution_order);

    Ok(())
}

/// Handle the edit command
pub async fn handle_edit(
    config: &Config,
    id: i64,
    title: Option<&str>,
    desc: Option<&str>,
    no_desc: bool,
    deps: Option<Vec<i64>>,
    no_deps: bool,
) -> Result<()> {
    let scheduler = open(config).await?;

    let update = TaskUpdate {
        title: title.map(str::to_string),
        description: if no_desc {
            Some(None)
        } else {
            desc.map(|d| Some(d.to_string()))
        },
        dependencies: if no_deps { Some(vec![]) } else { deps },
    };
    if update.is_empty() {
        println!("Nothing to update for task #{id}");
        return Ok(());
    }

    let task = scheduler.update_task(id, update).await?;
    println!("Updated task #{}: {}", task.id, task.title);

    Ok(())
}

/// Handle the rm command
pub async fn handle_rm(config: &Config, id: i64) -> Result<()> {
    let scheduler = open(config).await?;

    let task = scheduler.delete_task(id).await?;
    println!("Deleted task #{}: {}", task.id, task.title);

    Ok(())
}

/// Handle the show command
pub async fn handle_show(config: &Config, id: i64, json: bool) -> Result<()> {
    let scheduler = open(config).await?;

    let detail = scheduler.get_task(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }
    let task = &detail.task;

    println!("[#{id}] {title}", id = task.id, title = task.title);
    println!("Project:      {}", task.project);
    println!("Status:       {}", task.status);
    println!("Order:        {}", task.execution_order);
    println!("Created:      {}", task.created_at.format("%Y-%m-%d %H:%M"));

    if let Some(ref desc) = task.description {
        println!("Description:  {desc}");
    }

    if !detail.dependency_info.is_empty() {
        let deps_str = detail
            .dependency_info
            .iter()
            .map(|d| match d.status {
                Some(status) => format!("#{} ({})", d.id, status.icon()),
                None => format!("#{} (missing)", d.id),
            })
            .collect::<Vec<_>>()
            .join(", ");
        println!("Dependencies: {deps_str}");
    }

    if !detail.dependents.is_empty() {
        let deps_str = detail
            .dependents
            .iter()
            .map(|id| format!("#{id}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("Dependents:   {deps_str}");
    }

    Ok(())
}

/// Handle the list command
pub async fn handle_list(config: &Config, json: bool) -> Result<()> {
    let scheduler = open(config).await?;

    let listing = scheduler.list_tasks(&config.project).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    print_listing(&listing);
    Ok(())
}

/// Handle the projects command
pub async fn handle_projects(config: &Config) -> Result<()> {
    let scheduler = open(config).await?;

    let projects = scheduler.list_projects().await?;
    if projects.is_empty() {
        println!("No projects found.");
    }
    for project in projects {
        println!("{project}");
    }

    Ok(())
}

/// Handle the depend command
pub async fn handle_depend(config: &Config, id: i64, on_id: i64) -> Result<()> {
    let scheduler = open(config).await?;

    scheduler.add_dependency(id, on_id).await?;
    println!("Added dependency: #{id} depends on #{on_id}");

    Ok(())
}

/// Handle the undepend command
pub async fn handle_undepend(config: &Config, id: i64, on_id: i64) -> Result<()> {
    let scheduler = open(config).await?;

    scheduler.remove_dependency(id, on_id).await?;
    println!("Removed dependency: #{id} no longer depends on #{on_id}");

    Ok(())
}

/// Handle the start command
pub async fn handle_start(config: &Config, id: i64) -> Result<()> {
    let task = open(config).await?.start_task(id).await?;
    println!("Started task #{}: {}", task.id, task.title);
    Ok(())
}

/// Handle the done command
pub async fn handle_done(config: &Config, id: i64) -> Result<()> {
    let task = open(config).await?.complete_task(id).await?;
    println!("Completed task #{}: {}", task.id, task.title);
    Ok(())
}

/// Handle the stop command
pub async fn handle_stop(config: &Config, id: i64) -> Result<()> {
    let task = open(config).await?.stop_task(id).await?;
    println!("Stopped task #{}: {}", task.id, task.title);
    Ok(())
}

/// Handle the block command
pub async fn handle_block(config: &Config, id: i64) -> Result<()> {
    let task = open(config).await?.block_task(id).await?;
    println!("Blocked task #{}: {}", task.id, task.title);
    Ok(())
}

/// Handle the unblock command
pub async fn handle_unblock(config: &Config, id: i64) -> Result<()> {
    let task = open(config).await?.unblock_task(id).await?;
    println!("Unblocked task #{}: {}", task.id, task.title);
    Ok(())
}

/// Handle the check command
pub async fn handle_check(config: &Config, id: i64, json: bool) -> Result<()> {
    let report = open(config).await?.can_execute(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.executable {
        println!("Task #{id} can start");
    } else if report.blocked_by.is_empty() {
        println!("Task #{id} cannot start");
    } else {
        let waiting = report
            .blocked_by
            .iter()
            .map(|dep| format!("#{dep}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("Task #{id} is waiting on: {waiting}");
    }
    Ok(())
}

/// Handle the reorder command
pub async fn handle_reorder(config: &Config, ids: &[i64]) -> Result<()> {
    let scheduler = open(config).await?;

    let tasks = scheduler.reorder(&config.project, ids).await?;
    println!("Order for project '{}':", config.project);
    print_tasks(&tasks);

    Ok(())
}

/// Handle the recompute command
pub async fn handle_recompute(config: &Config) -> Result<()> {
    let scheduler = open(config).await?;

    let tasks = scheduler.recompute(&config.project).await?;
    println!(
        "Recomputed order for project '{}' ({} tasks)",
        config.project,
        tasks.len()
    );

    Ok(())
}

// ==================== Helpers ====================

async fn open(config: &Config) -> Result<Scheduler<SqliteStore>> {
    if !config.db_path.exists() {
        return Err(TaskError::NotInitialized);
    }
    let store = SqliteStore::open(&config.db_path)?;
    if !store.is_initialized().await? {
        return Err(TaskError::NotInitialized);
    }
    debug!(db = %config.db_path.display(), project = %config.project, "opened task database");

    Ok(Scheduler::new(store).with_missing_dependency_policy(config.missing_dependency))
}

fn print_listing(listing: &TaskListing) {
    if listing.tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    print_tasks(&listing.tasks);

    println!();
    println!(
        "Legend: {} completed  {} in_progress  {} pending  {} blocked",
        Status::Completed.icon(),
        Status::InProgress.icon(),
        Status::Pending.icon(),
        Status::Blocked.icon()
    );

    for conflict in &listing.order_conflicts {
        eprintln!(
            "Warning: #{} (order {}) depends on #{} (order {}) which is ordered later",
            conflict.task_id, conflict.task_order, conflict.dep_id, conflict.dep_order
        );
    }
}

fn print_tasks(tasks: &[Task]) {
    let status_map: HashMap<i64, Status> = tasks.iter().map(|t| (t.id, t.status)).collect();

    for task in tasks {
        let dep_info = if task.dependencies.is_empty() {
            String::new()
        } else {
            let deps = task
                .dependencies
                .iter()
                .map(|id| match status_map.get(id) {
                    Some(status) => format!("#{id} {}", status.icon()),
                    None => format!("#{id}"),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!(" (deps: {deps})")
        };

        println!(
            "  [#{:>3}] {} {}{}",
            task.id,
            task.status.icon(),
            task.title,
            dep_info
        );
    }
}
