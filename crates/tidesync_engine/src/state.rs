//! Persisted sync job records.
//!
//! A [`SyncState`] is the durable description of one sync job: what it
//! syncs, with which options, and how its last run went. Job records live
//! in a dedicated collection of the local store and are read and written
//! through a [`SyncStateStore`].
//!
//! ```text
//!            run / reRun
//!   NEW ───────────────────► RUNNING ──► DONE
//!    ▲                         │  │
//!    │                         │  └────► FAILED
//!   create                     └───────► STOPPED
//! ```
//!
//! `startTime` is stamped when a job enters RUNNING and `endTime` when it
//! leaves RUNNING for a terminal status.

use crate::error::{SyncError, SyncResult};
use crate::options::SyncOptions;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tidesync_store::{IndexSpec, LocalStore, Query, ENTRY_ID};
use tracing::{debug, info};

/// Direction of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Server to client.
    Pull,
    /// Client to server.
    Push,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncType::Pull => f.write_str("pull"),
            SyncType::Push => f.write_str("push"),
        }
    }
}

/// Lifecycle status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Created, never run.
    New,
    /// Currently executing.
    Running,
    /// Last run completed.
    Done,
    /// Last run failed.
    Failed,
    /// Last run was stopped cooperatively.
    Stopped,
}

impl SyncStatus {
    /// Returns true for DONE, FAILED and STOPPED.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncStatus::Done | SyncStatus::Failed | SyncStatus::Stopped
        )
    }

    /// Upper-case name as persisted.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::New => "NEW",
            SyncStatus::Running => "RUNNING",
            SyncStatus::Done => "DONE",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a job either by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncKey {
    /// Store-assigned job id.
    Id(i64),
    /// Unique job name.
    Name(String),
}

impl From<i64> for SyncKey {
    fn from(id: i64) -> Self {
        SyncKey::Id(id)
    }
}

impl From<&str> for SyncKey {
    fn from(name: &str) -> Self {
        SyncKey::Name(name.to_string())
    }
}

impl From<String> for SyncKey {
    fn from(name: String) -> Self {
        SyncKey::Name(name)
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncKey::Id(id) => write!(f, "id {id}"),
            SyncKey::Name(name) => write!(f, "name {name}"),
        }
    }
}

/// A persisted sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    id: i64,
    #[serde(rename = "type")]
    sync_type: SyncType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    target: Value,
    #[serde(default)]
    options: SyncOptions,
    collection_name: String,
    status: SyncStatus,
    #[serde(default)]
    progress: u8,
    #[serde(default = "unknown")]
    total_size: i64,
    #[serde(default = "unknown")]
    watermark: i64,
    #[serde(default)]
    start_time: i64,
    #[serde(default)]
    end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn unknown() -> i64 {
    -1
}

impl SyncState {
    fn new(
        sync_type: SyncType,
        target: Value,
        options: SyncOptions,
        collection_name: &str,
        name: Option<&str>,
    ) -> Self {
        Self {
            id: -1,
            sync_type,
            name: name.map(str::to_string),
            target,
            options,
            collection_name: collection_name.to_string(),
            status: SyncStatus::New,
            progress: 0,
            total_size: -1,
            watermark: -1,
            start_time: 0,
            end_time: 0,
            error: None,
        }
    }

    /// Store-assigned job id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Job direction.
    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    /// Optional unique name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Serialized target descriptor.
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// Job options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Local collection the job reads or writes.
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Progress percentage, 0 to 100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Number of records in the current run, -1 until known.
    pub fn total_size(&self) -> i64 {
        self.total_size
    }

    /// Highest remote modification timestamp seen by a pull job, -1 if none.
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Epoch millis at which the last run started, 0 if never run.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Epoch millis at which the last run ended, 0 if it never ended.
    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    /// Error text of the last failed run.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns true if the last run completed.
    pub fn is_done(&self) -> bool {
        self.status == SyncStatus::Done
    }

    /// Returns true if the job is running.
    pub fn is_running(&self) -> bool {
        self.status == SyncStatus::Running
    }

    /// Returns true if the last run was stopped.
    pub fn is_stopped(&self) -> bool {
        self.status == SyncStatus::Stopped
    }

    /// Returns true if the last run failed.
    pub fn has_failed(&self) -> bool {
        self.status == SyncStatus::Failed
    }

    /// Returns true if the status is DONE, FAILED or STOPPED.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn set_status(&mut self, status: SyncStatus) {
        if self.status != SyncStatus::Running && status == SyncStatus::Running {
            self.start_time = now_millis();
            self.error = None;
        }
        if self.status == SyncStatus::Running && status.is_terminal() {
            self.end_time = now_millis();
        }
        self.status = status;
    }

    pub(crate) fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }

    pub(crate) fn set_total_size(&mut self, total_size: i64) {
        self.total_size = total_size;
    }

    pub(crate) fn set_watermark(&mut self, watermark: i64) {
        self.watermark = watermark;
    }

    pub(crate) fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    fn to_document(&self) -> SyncResult<Value> {
        let mut doc = serde_json::to_value(self)?;
        if self.id >= 0 {
            doc[ENTRY_ID] = Value::from(self.id);
        }
        Ok(doc)
    }

    fn from_document(mut doc: Value) -> SyncResult<Self> {
        if let Some(object) = doc.as_object_mut() {
            object.remove(ENTRY_ID);
        }
        Ok(serde_json::from_value(doc)?)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Reads and writes job records in the jobs collection.
///
/// The id of a job is the entry id the store assigned to its record.
pub struct SyncStateStore {
    store: Arc<dyn LocalStore>,
    collection: String,
    create_lock: Mutex<()>,
}

impl SyncStateStore {
    /// Creates a job store over the given collection.
    pub fn new(store: Arc<dyn LocalStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            create_lock: Mutex::new(()),
        }
    }

    /// Name of the jobs collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Registers the jobs collection with indexes on name, type and status.
    pub fn setup_collection(&self) -> SyncResult<()> {
        self.store.register_collection(
            &self.collection,
            &[
                IndexSpec::new("name"),
                IndexSpec::new("type"),
                IndexSpec::new("status"),
            ],
        )?;
        Ok(())
    }

    /// Persists a new job in status NEW and returns it with its id assigned.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if another job already uses `name`.
    pub fn create(
        &self,
        sync_type: SyncType,
        target: Value,
        options: SyncOptions,
        collection_name: &str,
        name: Option<&str>,
    ) -> SyncResult<SyncState> {
        let _guard = self.create_lock.lock();
        if let Some(name) = name {
            if self.has_name(name)? {
                return Err(SyncError::DuplicateName(name.to_string()));
            }
        }

        let mut state = SyncState::new(sync_type, target, options, collection_name, name);
        let stored = self.store.upsert(&self.collection, state.to_document()?)?;
        state.id = stored
            .get(ENTRY_ID)
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::target("job record stored without entry id"))?;
        self.save(&state)?;

        info!(
            sync_id = state.id,
            sync_type = %sync_type,
            name = ?state.name,
            collection = %state.collection_name,
            "created sync"
        );
        Ok(state)
    }

    /// Writes the job record back to the store.
    pub fn save(&self, state: &SyncState) -> SyncResult<()> {
        self.store.upsert(&self.collection, state.to_document()?)?;
        Ok(())
    }

    /// Loads a job by id.
    pub fn by_id(&self, id: i64) -> SyncResult<Option<SyncState>> {
        self.store
            .retrieve(&self.collection, id)?
            .map(SyncState::from_document)
            .transpose()
    }

    /// Loads a job by name.
    pub fn by_name(&self, name: &str) -> SyncResult<Option<SyncState>> {
        match self
            .store
            .lookup_entry_id(&self.collection, "name", &Value::from(name))?
        {
            Some(id) => self.by_id(id),
            None => Ok(None),
        }
    }

    /// Loads a job by id or name.
    pub fn get(&self, key: &SyncKey) -> SyncResult<Option<SyncState>> {
        match key {
            SyncKey::Id(id) => self.by_id(*id),
            SyncKey::Name(name) => self.by_name(name),
        }
    }

    /// Returns true if a job with this name exists.
    pub fn has_name(&self, name: &str) -> SyncResult<bool> {
        Ok(self
            .store
            .lookup_entry_id(&self.collection, "name", &Value::from(name))?
            .is_some())
    }

    /// Loads every job in the given status, in id order.
    pub fn with_status(&self, status: SyncStatus) -> SyncResult<Vec<SyncState>> {
        let query = Query::eq("status", Value::from(status.as_str()));
        self.store
            .query(&self.collection, &query)?
            .into_iter()
            .map(SyncState::from_document)
            .collect()
    }

    /// Loads every job, in id order.
    pub fn all(&self) -> SyncResult<Vec<SyncState>> {
        self.store
            .query(&self.collection, &Query::all())?
            .into_iter()
            .map(SyncState::from_document)
            .collect()
    }

    /// Deletes a job record. Returns true if it existed.
    pub fn delete_by_id(&self, id: i64) -> SyncResult<bool> {
        let removed = self.store.delete(&self.collection, id)?;
        if removed {
            debug!(sync_id = id, "deleted sync");
        }
        Ok(removed)
    }

    /// Deletes a job record by name. Returns true if it existed.
    pub fn delete_by_name(&self, name: &str) -> SyncResult<bool> {
        match self
            .store
            .lookup_entry_id(&self.collection, "name", &Value::from(name))?
        {
            Some(id) => self.delete_by_id(id),
            None => Ok(false),
        }
    }

    /// Rewrites jobs left RUNNING by a previous process as STOPPED.
    ///
    /// Returns the number of jobs recovered.
    pub fn recover_interrupted(&self) -> SyncResult<usize> {
        let interrupted = self.with_status(SyncStatus::Running)?;
        for mut state in interrupted.iter().cloned() {
            state.set_status(SyncStatus::Stopped);
            self.save(&state)?;
            info!(sync_id = state.id, "recovered interrupted sync as stopped");
        }
        Ok(interrupted.len())
    }
}

impl fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStateStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MergeMode;
    use serde_json::json;
    use tidesync_store::MemoryStore;

    fn job_store() -> SyncStateStore {
        let states = SyncStateStore::new(Arc::new(MemoryStore::new()), "syncs");
        states.setup_collection().unwrap();
        states
    }

    fn create_pull(states: &SyncStateStore, name: Option<&str>) -> SyncState {
        states
            .create(
                SyncType::Pull,
                json!({"kind": "scripted"}),
                SyncOptions::overwrite(),
                "accounts",
                name,
            )
            .unwrap()
    }

    #[test]
    fn create_assigns_id_and_defaults() {
        let states = job_store();
        let sync = create_pull(&states, Some("accounts-down"));

        assert!(sync.id() > 0);
        assert_eq!(sync.status(), SyncStatus::New);
        assert_eq!(sync.progress(), 0);
        assert_eq!(sync.total_size(), -1);
        assert_eq!(sync.watermark(), -1);
        assert_eq!(sync.start_time(), 0);
        assert_eq!(sync.end_time(), 0);
        assert!(sync.error().is_none());

        let loaded = states.by_id(sync.id()).unwrap().unwrap();
        assert_eq!(loaded, sync);
    }

    #[test]
    fn duplicate_name_rejected() {
        let states = job_store();
        create_pull(&states, Some("contacts"));

        let result = states.create(
            SyncType::Push,
            json!({"kind": "scripted"}),
            SyncOptions::overwrite(),
            "contacts",
            Some("contacts"),
        );
        assert!(matches!(result, Err(SyncError::DuplicateName(n)) if n == "contacts"));
        assert_eq!(states.all().unwrap().len(), 1);
    }

    #[test]
    fn unnamed_jobs_can_coexist() {
        let states = job_store();
        let a = create_pull(&states, None);
        let b = create_pull(&states, None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn persisted_document_keys() {
        let states = job_store();
        let sync = states
            .create(
                SyncType::Push,
                json!({"kind": "rest"}),
                SyncOptions::leave_if_changed().with_fieldlist(["Name"]),
                "contacts",
                Some("up"),
            )
            .unwrap();

        let doc = serde_json::to_value(&sync).unwrap();
        assert_eq!(doc["type"], json!("push"));
        assert_eq!(doc["status"], json!("NEW"));
        assert_eq!(doc["collectionName"], json!("contacts"));
        assert_eq!(doc["totalSize"], json!(-1));
        assert_eq!(doc["options"]["mergeMode"], json!("LEAVE_IF_CHANGED"));
        assert_eq!(doc["options"]["fieldlist"], json!(["Name"]));
        assert!(doc.get("error").is_none());
    }

    #[test]
    fn lookup_by_name_and_key() {
        let states = job_store();
        let sync = create_pull(&states, Some("named"));

        assert_eq!(states.by_name("named").unwrap().unwrap().id(), sync.id());
        assert!(states.by_name("missing").unwrap().is_none());
        assert!(states.has_name("named").unwrap());
        assert_eq!(
            states.get(&SyncKey::from("named")).unwrap().unwrap().id(),
            sync.id()
        );
        assert_eq!(
            states.get(&SyncKey::from(sync.id())).unwrap().unwrap().id(),
            sync.id()
        );
    }

    #[test]
    fn status_transitions_stamp_times() {
        let states = job_store();
        let mut sync = create_pull(&states, None);
        sync.set_error("previous failure");

        sync.set_status(SyncStatus::Running);
        assert!(sync.start_time() > 0);
        assert_eq!(sync.end_time(), 0);
        assert!(sync.error().is_none());

        sync.set_status(SyncStatus::Done);
        assert!(sync.end_time() >= sync.start_time());
    }

    #[test]
    fn running_to_running_keeps_start_time() {
        let mut sync = SyncState::new(SyncType::Pull, json!({}), SyncOptions::default(), "c", None);
        sync.set_status(SyncStatus::Running);
        let started = sync.start_time();
        sync.set_status(SyncStatus::Running);
        assert_eq!(sync.start_time(), started);
        assert_eq!(sync.end_time(), 0);
    }

    #[test]
    fn with_status_and_recover() {
        let states = job_store();
        let mut running = create_pull(&states, Some("a"));
        running.set_status(SyncStatus::Running);
        states.save(&running).unwrap();
        create_pull(&states, Some("b"));

        assert_eq!(states.with_status(SyncStatus::Running).unwrap().len(), 1);
        assert_eq!(states.recover_interrupted().unwrap(), 1);
        assert!(states.with_status(SyncStatus::Running).unwrap().is_empty());

        let recovered = states.by_id(running.id()).unwrap().unwrap();
        assert_eq!(recovered.status(), SyncStatus::Stopped);
        assert!(recovered.end_time() > 0);
    }

    #[test]
    fn delete_by_id_and_name() {
        let states = job_store();
        let a = create_pull(&states, Some("a"));
        create_pull(&states, Some("b"));

        assert!(states.delete_by_id(a.id()).unwrap());
        assert!(!states.delete_by_id(a.id()).unwrap());
        assert!(states.delete_by_name("b").unwrap());
        assert!(!states.delete_by_name("b").unwrap());
        assert!(states.all().unwrap().is_empty());
    }

    #[test]
    fn options_survive_round_trip_through_store() {
        let states = job_store();
        let sync = states
            .create(
                SyncType::Push,
                json!({"kind": "rest", "objectType": "Contact"}),
                SyncOptions::leave_if_changed(),
                "contacts",
                None,
            )
            .unwrap();

        let loaded = states.by_id(sync.id()).unwrap().unwrap();
        assert_eq!(loaded.options().merge_mode(), MergeMode::LeaveIfChanged);
        assert_eq!(loaded.target()["objectType"], json!("Contact"));
    }
}
