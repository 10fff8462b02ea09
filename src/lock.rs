//! Per-project serialisation of read-modify-write cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// One async mutex per project id. Holding the guard gives exclusive
/// ownership of that project's snapshot; other projects are unaffected.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one project until dropped
#[derive(Debug)]
pub struct ProjectGuard {
    project: String,
    _guard: OwnedMutexGuard<()>,
}

impl ProjectGuard {
    pub fn project(&self) -> &str {
        &self.project
    }
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, project: &str) -> ProjectGuard {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody holds or waits on
            locks.retain(|key, lock| key == project || Arc::strong_count(lock) > 1);
            locks
                .entry(project.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;
        trace!(project, "acquired project lock");
        ProjectGuard {
            project: project.to_string(),
            _guard: guard,
        }
    }

    /// Number of projects with a live lock entry
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
