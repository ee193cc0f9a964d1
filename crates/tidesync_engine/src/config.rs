//! Configuration for the sync manager.

/// Default name of the collection holding job records.
pub const DEFAULT_SYNCS_COLLECTION: &str = "syncs";

/// Default name of the worker thread.
pub const DEFAULT_WORKER_NAME: &str = "tidesync-worker";

/// Configuration for a [`crate::SyncManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Collection holding the persisted job records.
    pub syncs_collection: String,
    /// Name given to the worker thread.
    pub worker_name: String,
    /// Whether to mark jobs left RUNNING by a previous process as STOPPED
    /// when the manager starts.
    pub recover_interrupted: bool,
}

impl ManagerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            syncs_collection: DEFAULT_SYNCS_COLLECTION.to_string(),
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            recover_interrupted: true,
        }
    }

    /// Sets the job record collection.
    pub fn with_syncs_collection(mut self, name: impl Into<String>) -> Self {
        self.syncs_collection = name.into();
        self
    }

    /// Sets the worker thread name.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets whether interrupted jobs are recovered at startup.
    pub fn with_recover_interrupted(mut self, recover: bool) -> Self {
        self.recover_interrupted = recover;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.syncs_collection, "syncs");
        assert_eq!(config.worker_name, "tidesync-worker");
        assert!(config.recover_interrupted);
    }

    #[test]
    fn manager_config_builder() {
        let config = ManagerConfig::new()
            .with_syncs_collection("jobs")
            .with_worker_name("sync-test")
            .with_recover_interrupted(false);

        assert_eq!(config.syncs_collection, "jobs");
        assert_eq!(config.worker_name, "sync-test");
        assert!(!config.recover_interrupted);
    }
}
