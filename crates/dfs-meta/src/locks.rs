//! Per-path mutual exclusion for multi-step coordination handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Async locks keyed by path, created on demand.
#[derive(Default)]
pub struct PathLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Holds every lock taken by one [`PathLocks::lock`] call.
#[must_use]
pub struct PathGuard {
    _held: Vec<OwnedMutexGuard<()>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, path: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the table references an idle lock.
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(table.entry(path.to_string()).or_default())
    }

    /// Lock every path in `paths`. Locks are taken in lexicographic order
    /// so two callers locking overlapping sets cannot deadlock.
    pub async fn lock(&self, paths: &[&str]) -> PathGuard {
        let mut ordered: Vec<&str> = paths.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        let mut held = Vec::with_capacity(ordered.len());
        for path in ordered {
            held.push(self.handle(path).lock_owned().await);
        }
        PathGuard { _held: held }
    }

    /// Paths with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
