//! Remote target adapters.
//!
//! A target knows how to talk to one kind of remote record set. The engine
//! drives targets through three roles:
//!
//! - [`PullTarget`]: paged fetch of remote records, ghost detection
//! - [`PushTarget`]: per-record create, update and delete on the server
//! - [`BatchPushTarget`]: push of several records per request
//!
//! Most of the local-store side of a target has default implementations
//! built on the record flags in [`crate::record`]; adapters only implement
//! the remote calls.
//!
//! Targets are persisted as an opaque JSON descriptor inside the job record.
//! A [`TargetFactory`] rebuilds a target from its descriptor when a job is
//! re-run.

use crate::error::{SyncError, SyncResult};
use crate::options::MergeMode;
use crate::record::{self, LOCAL, LOCALLY_CREATED, LOCALLY_DELETED, LOCALLY_UPDATED, SYNC_ID};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tidesync_store::{EntryId, LocalStore, Query};
use tracing::debug;

/// Default server id field.
pub const DEFAULT_ID_FIELD: &str = "Id";

/// Default modification timestamp field.
pub const DEFAULT_MODIFICATION_FIELD: &str = "LastModifiedDate";

/// One page of remote records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Records in this page.
    pub records: Vec<Value>,
    /// Total number of records the fetch will return. Only read from the
    /// first page.
    pub total_size: i64,
    /// Cursor for the next page, `None` on the last page.
    pub next: Option<String>,
}

impl Page {
    /// Creates a page.
    pub fn new(records: Vec<Value>, total_size: i64, next: Option<String>) -> Self {
        Self {
            records,
            total_size,
            next,
        }
    }
}

/// Result of one server call made while pushing a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The server created the record and assigned this id.
    Created(String),
    /// The call succeeded.
    Success,
    /// The record does not exist on the server.
    NotFound,
    /// The server refused the record. Recorded on the record, does not fail
    /// the job.
    Rejected(String),
}

/// Source of records for pull jobs.
pub trait PullTarget: Send + Sync {
    /// Serialized form persisted in the job record.
    fn descriptor(&self) -> Value;

    /// Field holding the server id.
    fn id_field_name(&self) -> &str {
        DEFAULT_ID_FIELD
    }

    /// Field holding the remote modification timestamp (epoch millis).
    fn modification_date_field_name(&self) -> &str {
        DEFAULT_MODIFICATION_FIELD
    }

    /// Fetches the first page of records modified after `watermark`.
    ///
    /// A watermark of -1 fetches everything.
    fn start_fetch(&self, watermark: i64) -> SyncResult<Page>;

    /// Fetches the page behind `cursor`, or `None` when there is none.
    fn continue_fetch(&self, cursor: &str) -> SyncResult<Option<Page>>;

    /// Highest modification timestamp among `records`, -1 if none.
    fn latest_modification_timestamp(&self, records: &[Value]) -> i64 {
        let field = self.modification_date_field_name();
        records
            .iter()
            .filter_map(|r| r.get(field).and_then(Value::as_i64))
            .max()
            .unwrap_or(-1)
    }

    /// Whether pages arrive in ascending modification time.
    ///
    /// When true, the watermark is persisted after every page so an
    /// interrupted run resumes where it left off.
    fn is_page_order_guaranteed_by_mod_time(&self) -> bool {
        false
    }

    /// Server ids of records that must not be overwritten by a pull.
    ///
    /// Defaults to the ids of every locally modified record.
    fn ids_to_skip(&self, store: &dyn LocalStore, collection: &str) -> SyncResult<HashSet<String>> {
        let id_field = self.id_field_name();
        Ok(store
            .query(collection, &Query::eq(LOCAL, Value::Bool(true)))?
            .iter()
            .filter_map(|r| record::server_id(r, id_field))
            .collect())
    }

    /// Saves fetched records, matched on their server id.
    ///
    /// Saved records are clean and tagged with the id of the job that
    /// fetched them.
    fn save_records_to_local_store(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        records: Vec<Value>,
        sync_id: i64,
    ) -> SyncResult<()> {
        let id_field = self.id_field_name();
        for mut record in records {
            record::mark_clean(&mut record);
            if let Some(object) = record.as_object_mut() {
                object.insert(SYNC_ID.into(), Value::from(sync_id));
            }
            store.upsert_by_external_id(collection, record, id_field)?;
        }
        Ok(())
    }

    /// The subset of `ids` that still exists on the server.
    fn remote_ids(&self, ids: &[String]) -> SyncResult<HashSet<String>>;

    /// Deletes local records of this job that no longer exist remotely.
    ///
    /// Locally modified records are kept. Returns how many were deleted.
    fn clean_ghosts(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        sync_id: i64,
    ) -> SyncResult<usize> {
        let id_field = self.id_field_name();
        let local = store.query(collection, &Query::eq(SYNC_ID, Value::from(sync_id)))?;
        let ids: Vec<String> = local
            .iter()
            .filter_map(|r| record::server_id(r, id_field))
            .collect();
        let remote = self.remote_ids(&ids)?;

        let mut removed = 0;
        for ghost in &local {
            let gone = record::server_id(ghost, id_field).is_some_and(|id| !remote.contains(&id));
            if !gone || record::is_dirty(ghost) {
                continue;
            }
            if let Some(entry_id) = record::entry_id(ghost) {
                if store.delete(collection, entry_id)? {
                    removed += 1;
                }
            }
        }
        debug!(
            collection,
            sync_id,
            local = local.len(),
            removed,
            "cleaned ghosts"
        );
        Ok(removed)
    }
}

/// Destination of records for push jobs.
pub trait PushTarget: Send + Sync {
    /// Serialized form persisted in the job record.
    fn descriptor(&self) -> Value;

    /// Field holding the server id.
    fn id_field_name(&self) -> &str {
        DEFAULT_ID_FIELD
    }

    /// Fields sent on create; `None` defers to the job's field list.
    fn create_fieldlist(&self) -> Option<&[String]> {
        None
    }

    /// Fields sent on update; `None` defers to the job's field list.
    fn update_fieldlist(&self) -> Option<&[String]> {
        None
    }

    /// Entry ids of the locally modified records, in store order.
    fn dirty_ids(&self, store: &dyn LocalStore, collection: &str) -> SyncResult<Vec<EntryId>> {
        Ok(store
            .query(collection, &Query::eq(LOCAL, Value::Bool(true)))?
            .iter()
            .filter_map(record::entry_id)
            .collect())
    }

    /// Loads a local record by entry id.
    fn fetch_local(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        entry_id: EntryId,
    ) -> SyncResult<Option<Value>> {
        Ok(store.retrieve(collection, entry_id)?)
    }

    /// Whether the record was created locally.
    fn is_locally_created(&self, record: &Value) -> bool {
        record::flag(record, LOCALLY_CREATED)
    }

    /// Whether the record was updated locally.
    fn is_locally_updated(&self, record: &Value) -> bool {
        record::flag(record, LOCALLY_UPDATED)
    }

    /// Whether the record was deleted locally.
    fn is_locally_deleted(&self, record: &Value) -> bool {
        record::flag(record, LOCALLY_DELETED)
    }

    /// Whether the local copy is at least as recent as the server copy.
    ///
    /// Only consulted under [`MergeMode::LeaveIfChanged`].
    fn is_newer_than_server(&self, record: &Value) -> SyncResult<bool>;

    /// Creates the record on the server.
    fn create_on_server(
        &self,
        record: &Value,
        fieldlist: Option<&[String]>,
    ) -> SyncResult<PushOutcome>;

    /// Updates the record on the server.
    fn update_on_server(
        &self,
        record: &Value,
        fieldlist: Option<&[String]>,
    ) -> SyncResult<PushOutcome>;

    /// Deletes the record on the server.
    fn delete_on_server(&self, record: &Value) -> SyncResult<PushOutcome>;

    /// Clears the record's flags and writes it back.
    fn clean_and_save_in_local_store(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        mut record: Value,
    ) -> SyncResult<()> {
        record::mark_clean(&mut record);
        store.upsert(collection, record)?;
        Ok(())
    }

    /// Writes the record back with its flags intact and the error recorded.
    fn save_with_last_error(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        mut record: Value,
        error: &str,
    ) -> SyncResult<()> {
        record::set_last_error(&mut record, error);
        store.upsert(collection, record)?;
        Ok(())
    }

    /// Removes the record from the local collection.
    fn delete_from_local_store(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        record: &Value,
    ) -> SyncResult<()> {
        if let Some(entry_id) = record::entry_id(record) {
            store.delete(collection, entry_id)?;
        }
        Ok(())
    }

    /// Batch capability. Targets returning `Some` are pushed in batches.
    fn as_batch(&self) -> Option<&dyn BatchPushTarget> {
        None
    }
}

/// A push target that sends several records per request.
pub trait BatchPushTarget: PushTarget {
    /// Maximum number of records per request.
    fn max_batch_size(&self) -> usize;

    /// Staleness check for a whole batch, one answer per record.
    fn are_newer_than_server(&self, records: &[Value]) -> SyncResult<Vec<bool>> {
        records
            .iter()
            .map(|r| self.is_newer_than_server(r))
            .collect()
    }

    /// Pushes the batch and reconciles the local records with the results.
    fn push_batch(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        records: &[Value],
        fieldlist: Option<&[String]>,
        merge_mode: MergeMode,
    ) -> SyncResult<()>;
}

/// Rebuilds targets from their persisted descriptors.
pub trait TargetFactory: Send + Sync {
    /// Builds a pull target.
    fn pull_target(&self, descriptor: &Value) -> SyncResult<Arc<dyn PullTarget>>;

    /// Builds a push target.
    fn push_target(&self, descriptor: &Value) -> SyncResult<Arc<dyn PushTarget>>;
}

type PullBuilder = Box<dyn Fn(&Value) -> SyncResult<Arc<dyn PullTarget>> + Send + Sync>;
type PushBuilder = Box<dyn Fn(&Value) -> SyncResult<Arc<dyn PushTarget>> + Send + Sync>;

/// A [`TargetFactory`] keyed by the descriptor's `"kind"` string.
///
/// ```rust
/// use tidesync_engine::{TargetFactory, TargetRegistry};
/// use serde_json::json;
///
/// let registry = TargetRegistry::new();
/// assert!(registry.pull_target(&json!({"kind": "soql"})).is_err());
/// ```
#[derive(Default)]
pub struct TargetRegistry {
    pull: RwLock<HashMap<String, PullBuilder>>,
    push: RwLock<HashMap<String, PushBuilder>>,
}

impl TargetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the builder for pull descriptors of `kind`.
    pub fn register_pull<F>(&self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&Value) -> SyncResult<Arc<dyn PullTarget>> + Send + Sync + 'static,
    {
        self.pull.write().insert(kind.into(), Box::new(builder));
    }

    /// Registers the builder for push descriptors of `kind`.
    pub fn register_push<F>(&self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&Value) -> SyncResult<Arc<dyn PushTarget>> + Send + Sync + 'static,
    {
        self.push.write().insert(kind.into(), Box::new(builder));
    }
}

fn kind_of(descriptor: &Value) -> SyncResult<&str> {
    descriptor
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::UnknownTarget(descriptor.to_string()))
}

impl TargetFactory for TargetRegistry {
    fn pull_target(&self, descriptor: &Value) -> SyncResult<Arc<dyn PullTarget>> {
        let kind = kind_of(descriptor)?;
        let builders = self.pull.read();
        let builder = builders
            .get(kind)
            .ok_or_else(|| SyncError::UnknownTarget(descriptor.to_string()))?;
        builder(descriptor)
    }

    fn push_target(&self, descriptor: &Value) -> SyncResult<Arc<dyn PushTarget>> {
        let kind = kind_of(descriptor)?;
        let builders = self.push.read();
        let builder = builders
            .get(kind)
            .ok_or_else(|| SyncError::UnknownTarget(descriptor.to_string()))?;
        builder(descriptor)
    }
}

impl fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pull: Vec<String> = self.pull.read().keys().cloned().collect();
        let mut push: Vec<String> = self.push.read().keys().cloned().collect();
        pull.sort();
        push.sort();
        f.debug_struct("TargetRegistry")
            .field("pull", &pull)
            .field("push", &push)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidesync_store::{IndexSpec, MemoryStore};

    struct StaticPull {
        remote: HashSet<String>,
    }

    impl PullTarget for StaticPull {
        fn descriptor(&self) -> Value {
            json!({"kind": "static"})
        }

        fn start_fetch(&self, _watermark: i64) -> SyncResult<Page> {
            Ok(Page::default())
        }

        fn continue_fetch(&self, _cursor: &str) -> SyncResult<Option<Page>> {
            Ok(None)
        }

        fn remote_ids(&self, ids: &[String]) -> SyncResult<HashSet<String>> {
            Ok(ids
                .iter()
                .filter(|id| self.remote.contains(*id))
                .cloned()
                .collect())
        }
    }

    fn store_with(records: &[Value]) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .register_collection("accounts", &[IndexSpec::new("Id")])
            .unwrap();
        for record in records {
            store.upsert("accounts", record.clone()).unwrap();
        }
        store
    }

    #[test]
    fn latest_modification_timestamp_default() {
        let target = StaticPull {
            remote: HashSet::new(),
        };
        let records = vec![
            json!({"LastModifiedDate": 5}),
            json!({"LastModifiedDate": 12}),
            json!({"Name": "no date"}),
        ];
        assert_eq!(target.latest_modification_timestamp(&records), 12);
        assert_eq!(target.latest_modification_timestamp(&[]), -1);
    }

    #[test]
    fn save_records_tags_and_cleans() {
        let store = store_with(&[json!({"Id": "001", "Name": "old"})]);
        let target = StaticPull {
            remote: HashSet::new(),
        };

        target
            .save_records_to_local_store(
                &store,
                "accounts",
                vec![json!({"Id": "001", "Name": "new"}), json!({"Id": "002"})],
                9,
            )
            .unwrap();

        let docs = store.query("accounts", &Query::all()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["Name"], json!("new"));
        assert!(docs.iter().all(|d| d[SYNC_ID] == json!(9)));
        assert!(docs.iter().all(|d| !record::is_dirty(d)));
    }

    #[test]
    fn ids_to_skip_lists_dirty_records() {
        let store = store_with(&[
            json!({"Id": "001", "__local__": true}),
            json!({"Id": "002", "__local__": false}),
            json!({"Id": 3, "__local__": true}),
        ]);
        let target = StaticPull {
            remote: HashSet::new(),
        };

        let skip = target.ids_to_skip(&store, "accounts").unwrap();
        assert_eq!(skip, HashSet::from(["001".to_string(), "3".to_string()]));
    }

    #[test]
    fn clean_ghosts_keeps_remote_and_dirty_records() {
        let store = store_with(&[
            json!({"Id": "001", "__sync_id__": 1}),
            json!({"Id": "002", "__sync_id__": 1}),
            json!({"Id": "003", "__sync_id__": 1, "__local__": true}),
            json!({"Id": "004", "__sync_id__": 2}),
        ]);
        let target = StaticPull {
            remote: HashSet::from(["001".to_string()]),
        };

        let removed = target.clean_ghosts(&store, "accounts", 1).unwrap();
        assert_eq!(removed, 1);

        let ids: Vec<String> = store
            .query("accounts", &Query::all())
            .unwrap()
            .iter()
            .filter_map(|r| record::server_id(r, "Id"))
            .collect();
        assert_eq!(ids, vec!["001", "003", "004"]);
    }

    #[test]
    fn registry_builds_by_kind() {
        let registry = TargetRegistry::new();
        registry.register_pull("static", |descriptor| {
            assert_eq!(descriptor["kind"], json!("static"));
            Ok(Arc::new(StaticPull {
                remote: HashSet::new(),
            }) as Arc<dyn PullTarget>)
        });

        let target = registry.pull_target(&json!({"kind": "static"})).unwrap();
        assert_eq!(target.descriptor(), json!({"kind": "static"}));

        assert!(matches!(
            registry.pull_target(&json!({"kind": "other"})),
            Err(SyncError::UnknownTarget(_))
        ));
        assert!(matches!(
            registry.push_target(&json!({"kind": "static"})),
            Err(SyncError::UnknownTarget(_))
        ));
        assert!(matches!(
            registry.pull_target(&json!({"no_kind": true})),
            Err(SyncError::UnknownTarget(_))
        ));
    }
}
