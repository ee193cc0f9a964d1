//! Test fixtures and manager helpers.
//!
//! Provides sync managers over temporary stores and builders for the
//! record shapes the engine works with.

use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Weak};
use tempfile::TempDir;
use tidesync_engine::{record, ManagerConfig, SyncManager, TargetFactory, TargetRegistry};
use tidesync_store::{FileStore, IndexSpec, LocalStore, MemoryStore};

/// A sync manager with its store and target registry.
pub struct TestManager {
    /// The manager instance, shareable with target hooks.
    pub manager: Arc<SyncManager>,
    /// The store the manager runs against.
    pub store: Arc<dyn LocalStore>,
    /// The target registry used to rebuild targets on re-run.
    pub targets: Arc<TargetRegistry>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestManager {
    /// Creates a manager over an in-memory store.
    pub fn memory() -> Self {
        let targets = Arc::new(TargetRegistry::new());
        Self::build(Arc::new(MemoryStore::new()), targets, None)
    }

    /// Creates a manager over a file store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path(), true).expect("Failed to open file store");
        let targets = Arc::new(TargetRegistry::new());
        Self::build(Arc::new(store), targets, Some(temp_dir))
    }

    fn build(
        store: Arc<dyn LocalStore>,
        targets: Arc<TargetRegistry>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let manager = SyncManager::new(
            Arc::clone(&store),
            Arc::clone(&targets) as Arc<dyn TargetFactory>,
            ManagerConfig::default().with_worker_name("tidesync-test"),
        )
        .map(Arc::new)
        .expect("Failed to create sync manager");
        Self {
            manager,
            store,
            targets,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Simulates a process restart.
    ///
    /// Drops the manager and store, then opens a new manager over the same
    /// directory with the same target registry.
    ///
    /// # Panics
    ///
    /// Panics for in-memory managers.
    pub fn reopen(self) -> Self {
        let Self {
            manager,
            store,
            targets,
            _temp_dir: temp_dir,
        } = self;
        let temp_dir = temp_dir.expect("Only file-based managers can be reopened");
        drop(manager);
        drop(store);

        let store = FileStore::open(temp_dir.path(), false).expect("Failed to reopen file store");
        Self::build(Arc::new(store), targets, Some(temp_dir))
    }

    /// A weak handle for hooks that must reach the manager from the worker.
    pub fn handle(&self) -> Weak<SyncManager> {
        Arc::downgrade(&self.manager)
    }

    /// Registers `collection` and inserts `records`, returning them as stored.
    pub fn seed(&self, collection: &str, records: Vec<Value>) -> Vec<Value> {
        seed(self.store.as_ref(), collection, records)
    }
}

impl std::ops::Deref for TestManager {
    type Target = SyncManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Registers `collection` and inserts `records`, returning them as stored.
pub fn seed(store: &dyn LocalStore, collection: &str, records: Vec<Value>) -> Vec<Value> {
    let indexes = [
        IndexSpec::new("Id"),
        IndexSpec::new(record::LOCAL),
        IndexSpec::new(record::SYNC_ID),
    ];
    store
        .register_collection(collection, &indexes)
        .expect("Failed to register collection");
    records
        .into_iter()
        .map(|r| {
            store
                .upsert(collection, r)
                .expect("Failed to seed record")
        })
        .collect()
}

/// A record as returned by a remote service.
pub fn remote_record(id: &str, modified: i64) -> Value {
    json!({
        "Id": id,
        "Name": format!("Record {id}"),
        "LastModifiedDate": modified,
    })
}

/// A record created on this device, not yet pushed.
pub fn local_created(name: &str) -> Value {
    let mut r = json!({"Id": null, "Name": name});
    record::mark_locally_created(&mut r);
    r
}

/// A synced record modified on this device.
pub fn local_updated(id: &str, name: &str) -> Value {
    let mut r = json!({"Id": id, "Name": name});
    record::mark_locally_updated(&mut r);
    r
}

/// A synced record deleted on this device.
pub fn local_deleted(id: &str) -> Value {
    let mut r = json!({"Id": id, "Name": format!("Record {id}")});
    record::mark_locally_deleted(&mut r);
    r
}

/// A synced record with no local changes.
pub fn local_clean(id: &str) -> Value {
    let mut r = json!({"Id": id, "Name": format!("Record {id}")});
    record::mark_clean(&mut r);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_store::Query;

    #[test]
    fn test_memory_manager() {
        let env = TestManager::memory();
        assert!(env.path().is_none());
        assert!(env.active_syncs().is_empty());
    }

    #[test]
    fn test_file_manager_reopen() {
        let env = TestManager::file();
        env.seed("accounts", vec![local_clean("001")]);
        let path = env.path().unwrap().to_path_buf();

        let env = env.reopen();
        assert_eq!(env.path().unwrap(), path);
        assert_eq!(env.store.count("accounts", &Query::all()).unwrap(), 1);
    }

    #[test]
    fn test_record_builders() {
        assert!(record::is_dirty(&local_created("x")));
        assert!(record::is_dirty(&local_updated("1", "x")));
        assert!(record::flag(&local_deleted("1"), record::LOCALLY_DELETED));
        assert!(!record::is_dirty(&local_clean("1")));
        assert_eq!(remote_record("7", 70)["LastModifiedDate"], json!(70));
    }
}
