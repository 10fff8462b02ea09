use crate::config::Overrides;
use crate::gate::MissingDependencyPolicy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "taskdag")]
#[command(about = "Dependency-ordered task tracker")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Database file (default: taskdag.db, or $TASKDAG_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Project to operate on (default: "default", or $TASKDAG_PROJECT)
    #[arg(long, short, global = true)]
    pub project: Option<String>,

    /// How the execution gate treats dependencies that no longer exist
    /// (default: block, or $TASKDAG_MISSING_DEPS)
    #[arg(long = "missing-deps", value_enum, global = true)]
    pub missing_deps: Option<MissingDependencyPolicy>,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            db_path: self.db.clone(),
            project: self.project.clone(),
            missing_dependency: self.missing_deps,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new task database
    Init,

    /// Add a new task to the end of the project's order
    Add {
        /// Task title
        title: String,
        /// Optional description
        #[arg(long)]
        desc: Option<String>,
        /// Task IDs this task depends on
        #[arg(long = "dep", value_name = "ID")]
        deps: Vec<i64>,
    },

    /// Edit an existing task
    Edit {
        /// Task ID
        id: i64,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New description
        #[arg(long)]
        desc: Option<String>,
        /// Clear description
        #[arg(long, conflicts_with = "desc")]
        no_desc: bool,
        /// Replace the dependency set (comma separated IDs)
        #[arg(long, value_delimiter = ',', num_args = 1.., conflicts_with = "no_deps")]
        deps: Option<Vec<i64>>,
        /// Remove every dependency
        #[arg(long)]
        no_deps: bool,
    },

    /// Delete a task
    Rm {
        /// Task ID
        id: i64,
    },

    /// Show task details
    Show {
        /// Task ID
        id: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the project's tasks in execution order
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List all projects
    Projects,

    /// Add a dependency
    Depend {
        /// Task ID (the dependent)
        id: i64,
        /// Task ID to depend on (the prerequisite)
        on_id: i64,
    },

    /// Remove a dependency
    Undepend {
        /// Task ID
        id: i64,
        /// Task ID to remove dependency on
        on_id: i64,
    },

    /// Start working on a task
    Start {
        /// Task ID
        id: i64,
    },

    /// Complete an in-progress task
    Done {
        /// Task ID
        id: i64,
    },

    /// Return an in-progress task to pending
    Stop {
        /// Task ID
        id: i64,
    },

    /// Block a task
    Block {
        /// Task ID
        id: i64,
    },

    /// Unblock a task
    Unblock {
        /// Task ID
        id: i64,
    },

    /// Check whether a task may start
    Check {
        /// Task ID
        id: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Propose a new order; dependencies still win
    Reorder {
        /// Task IDs in the desired order
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Recompute the project's execution order
    Recompute,
}
