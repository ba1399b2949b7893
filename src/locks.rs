use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Admission locks, created on first use and then kept for the lifetime of the registry.
///
/// A lock is held across a decide and the record that follows it, never across a wait.
#[derive(Default)]
pub(crate) struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub(crate) async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting
        let lock = self.locks.entry(name.to_owned()).or_default().clone();
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
