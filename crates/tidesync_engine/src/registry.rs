//! Per-account manager registry.

use crate::error::SyncResult;
use crate::manager::SyncManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Holds one [`SyncManager`] per account or store key.
///
/// The registry is an ordinary value owned by the application; there is no
/// process-wide instance.
#[derive(Debug, Default)]
pub struct ManagerRegistry {
    managers: Mutex<HashMap<String, Arc<SyncManager>>>,
}

impl ManagerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the manager for `key`, building it on first use.
    ///
    /// `build` runs at most once per key while the registry is locked.
    pub fn get_or_create<F>(&self, key: &str, build: F) -> SyncResult<Arc<SyncManager>>
    where
        F: FnOnce() -> SyncResult<SyncManager>,
    {
        let mut managers = self.managers.lock();
        if let Some(manager) = managers.get(key) {
            return Ok(Arc::clone(manager));
        }
        let manager = Arc::new(build()?);
        managers.insert(key.to_string(), Arc::clone(&manager));
        info!(key, "sync manager registered");
        Ok(manager)
    }

    /// Returns the manager for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<SyncManager>> {
        self.managers.lock().get(key).cloned()
    }

    /// Removes and resets the manager for `key`.
    pub fn remove(&self, key: &str) -> Option<Arc<SyncManager>> {
        let removed = self.managers.lock().remove(key);
        if let Some(manager) = &removed {
            manager.reset();
            info!(key, "sync manager removed");
        }
        removed
    }

    /// Removes and resets every manager.
    pub fn reset_all(&self) {
        let drained: Vec<(String, Arc<SyncManager>)> = self.managers.lock().drain().collect();
        for (key, manager) in drained {
            manager.reset();
            info!(key = %key, "sync manager removed");
        }
    }

    /// Sorted keys of the registered managers.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.managers.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered managers.
    pub fn len(&self) -> usize {
        self.managers.lock().len()
    }

    /// Returns true if no manager is registered.
    pub fn is_empty(&self) -> bool {
        self.managers.lock().is_empty()
    }
}
