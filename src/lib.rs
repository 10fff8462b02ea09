pub mod cli;
pub mod cli_handlers;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod gate;
pub mod graph;
pub mod lock;
pub mod logging;
pub mod models;
pub mod order;
pub mod reorder;
pub mod store;

pub use crate::core::{Scheduler, TaskListing};
pub use error::{Result, TaskError};
pub use models::*;
pub use store::{MemoryStore, ProjectSession, SaveBatch, SnapshotProvider};
