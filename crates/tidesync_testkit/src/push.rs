//! Scripted push targets.
//!
//! [`ScriptedPushTarget`] keeps an in-memory copy of the "server" records,
//! keyed by `Id`, and logs every call it receives:
//!
//! | Call                 | Log entry       |
//! |----------------------|-----------------|
//! | staleness check      | `check <id>`    |
//! | create               | `create <Name>` |
//! | update               | `update <id>`   |
//! | delete               | `delete <id>`   |

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tidesync_engine::{
    record, BatchPushTarget, MergeMode, PushOutcome, PushTarget, SyncError, SyncResult,
    TargetRegistry,
};
use tidesync_store::LocalStore;

type CallHook = Box<dyn Fn(usize) + Send + Sync>;
type ErrorFactory = Box<dyn Fn() -> SyncError + Send + Sync>;

fn id_of(record: &Value) -> String {
    record::server_id(record, "Id").unwrap_or_default()
}

fn label(record: &Value) -> String {
    record
        .get("Name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| id_of(record))
}

/// A push target backed by an in-memory server.
pub struct ScriptedPushTarget {
    kind: String,
    remote: Mutex<BTreeMap<String, Value>>,
    stale: HashSet<String>,
    rejected: HashSet<String>,
    calls: Mutex<Vec<String>>,
    server_calls: Mutex<usize>,
    next_id: Mutex<u64>,
    hook: Option<CallHook>,
    failure: Option<(usize, ErrorFactory)>,
}

impl Default for ScriptedPushTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPushTarget {
    /// Creates a target with an empty server.
    pub fn new() -> Self {
        Self {
            kind: "scripted-push".to_string(),
            remote: Mutex::new(BTreeMap::new()),
            stale: HashSet::new(),
            rejected: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            server_calls: Mutex::new(0),
            next_id: Mutex::new(1),
            hook: None,
            failure: None,
        }
    }

    /// Sets the descriptor kind used to rebuild the target.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Seeds server records, keyed by their `Id`.
    pub fn with_remote(self, records: Vec<Value>) -> Self {
        {
            let mut remote = self.remote.lock();
            for r in records {
                remote.insert(id_of(&r), r);
            }
        }
        self
    }

    /// Marks ids whose server copy changed after the client last saw it.
    pub fn with_stale<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.stale.extend(ids.into_iter().map(str::to_string));
        self
    }

    /// Rejects every create or update of a record with one of these names.
    pub fn rejecting<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.rejected.extend(names.into_iter().map(str::to_string));
        self
    }

    /// Calls `hook` with the call index before every create, update or delete.
    pub fn with_call_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Fails the create, update or delete call with index `call`.
    pub fn failing_at_call<F>(mut self, call: usize, error: F) -> Self
    where
        F: Fn() -> SyncError + Send + Sync + 'static,
    {
        self.failure = Some((call, Box::new(error)));
        self
    }

    /// Wraps the target for sharing with the engine.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Registers `target` under its kind so re-runs rebuild it.
    pub fn register(target: &Arc<Self>, registry: &TargetRegistry) {
        let shared = Arc::clone(target);
        registry.register_push(target.kind.clone(), move |_| {
            Ok(Arc::clone(&shared) as Arc<dyn PushTarget>)
        });
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Snapshot of the server records.
    pub fn remote(&self) -> BTreeMap<String, Value> {
        self.remote.lock().clone()
    }

    fn log(&self, entry: String) {
        self.calls.lock().push(entry);
    }

    fn server_call(&self) -> SyncResult<()> {
        let index = {
            let mut count = self.server_calls.lock();
            let index = *count;
            *count += 1;
            index
        };
        if let Some(hook) = &self.hook {
            hook(index);
        }
        match &self.failure {
            Some((failing, error)) if *failing == index => Err(error()),
            _ => Ok(()),
        }
    }
}

impl PushTarget for ScriptedPushTarget {
    fn descriptor(&self) -> Value {
        json!({"kind": self.kind})
    }

    fn is_newer_than_server(&self, record: &Value) -> SyncResult<bool> {
        let id = id_of(record);
        self.log(format!("check {id}"));
        Ok(!self.stale.contains(&id))
    }

    fn create_on_server(
        &self,
        record: &Value,
        fieldlist: Option<&[String]>,
    ) -> SyncResult<PushOutcome> {
        self.server_call()?;
        let name = label(record);
        self.log(format!("create {name}"));
        if self.rejected.contains(&name) {
            return Ok(PushOutcome::Rejected(format!("REJECTED: {name}")));
        }

        let id = {
            let mut next = self.next_id.lock();
            let id = format!("srv-{next}");
            *next += 1;
            id
        };
        let mut stored = project(record, fieldlist);
        stored["Id"] = Value::String(id.clone());
        self.remote.lock().insert(id.clone(), stored);
        Ok(PushOutcome::Created(id))
    }

    fn update_on_server(
        &self,
        record: &Value,
        fieldlist: Option<&[String]>,
    ) -> SyncResult<PushOutcome> {
        self.server_call()?;
        let id = id_of(record);
        self.log(format!("update {id}"));
        if self.rejected.contains(&label(record)) {
            return Ok(PushOutcome::Rejected(format!("REJECTED: {id}")));
        }

        let mut remote = self.remote.lock();
        match remote.get_mut(&id) {
            Some(existing) => {
                if let (Some(target), Value::Object(fields)) =
                    (existing.as_object_mut(), project(record, fieldlist))
                {
                    target.extend(fields);
                }
                Ok(PushOutcome::Success)
            }
            None => Ok(PushOutcome::NotFound),
        }
    }

    fn delete_on_server(&self, record: &Value) -> SyncResult<PushOutcome> {
        self.server_call()?;
        let id = id_of(record);
        self.log(format!("delete {id}"));
        Ok(match self.remote.lock().remove(&id) {
            Some(_) => PushOutcome::Success,
            None => PushOutcome::NotFound,
        })
    }
}

/// Keeps only the listed fields (plus `Id`), dropping local flags.
fn project(record: &Value, fieldlist: Option<&[String]>) -> Value {
    let Some(object) = record.as_object() else {
        return Value::Null;
    };
    let projected = object
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .filter(|(key, _)| {
            key.as_str() == "Id" || fieldlist.is_none_or(|fields| fields.iter().any(|f| f == *key))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(projected)
}

/// A batched push target over a [`ScriptedPushTarget`] server.
pub struct ScriptedBatchPushTarget {
    inner: ScriptedPushTarget,
    max_batch_size: usize,
    batches: Mutex<Vec<Vec<String>>>,
    checks: Mutex<Vec<usize>>,
}

impl ScriptedBatchPushTarget {
    /// Creates a batched target pushing at most `max_batch_size` records per request.
    pub fn new(inner: ScriptedPushTarget, max_batch_size: usize) -> Self {
        Self {
            inner,
            max_batch_size,
            batches: Mutex::new(Vec::new()),
            checks: Mutex::new(Vec::new()),
        }
    }

    /// Wraps the target for sharing with the engine.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Registers `target` under its server's kind so re-runs rebuild it.
    pub fn register(target: &Arc<Self>, registry: &TargetRegistry) {
        let shared = Arc::clone(target);
        registry.register_push(target.inner.kind.clone(), move |_| {
            Ok(Arc::clone(&shared) as Arc<dyn PushTarget>)
        });
    }

    /// The server side.
    pub fn server(&self) -> &ScriptedPushTarget {
        &self.inner
    }

    /// Labels (name, else id) of the records in each pushed batch.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    /// Size of each batched staleness check.
    pub fn checks(&self) -> Vec<usize> {
        self.checks.lock().clone()
    }

    fn reconcile(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        record: &Value,
        fieldlist: Option<&[String]>,
        merge_mode: MergeMode,
    ) -> SyncResult<()> {
        let server = &self.inner;
        let outcome = if server.is_locally_deleted(record) {
            if server.is_locally_created(record) {
                PushOutcome::NotFound
            } else {
                server.delete_on_server(record)?
            }
        } else if server.is_locally_created(record) {
            server.create_on_server(record, fieldlist)?
        } else {
            match server.update_on_server(record, fieldlist)? {
                PushOutcome::NotFound if merge_mode == MergeMode::Overwrite => {
                    server.create_on_server(record, fieldlist)?
                }
                PushOutcome::NotFound => return Ok(()),
                other => other,
            }
        };

        match outcome {
            PushOutcome::Rejected(message) => {
                server.save_with_last_error(store, collection, record.clone(), &message)
            }
            _ if server.is_locally_deleted(record) => {
                server.delete_from_local_store(store, collection, record)
            }
            PushOutcome::Created(id) => {
                let mut written = record.clone();
                written["Id"] = Value::String(id);
                server.clean_and_save_in_local_store(store, collection, written)
            }
            _ => server.clean_and_save_in_local_store(store, collection, record.clone()),
        }
    }
}

impl PushTarget for ScriptedBatchPushTarget {
    fn descriptor(&self) -> Value {
        json!({"kind": self.inner.kind, "batch": self.max_batch_size})
    }

    fn is_newer_than_server(&self, record: &Value) -> SyncResult<bool> {
        self.inner.is_newer_than_server(record)
    }

    fn create_on_server(
        &self,
        record: &Value,
        fieldlist: Option<&[String]>,
    ) -> SyncResult<PushOutcome> {
        self.inner.create_on_server(record, fieldlist)
    }

    fn update_on_server(
        &self,
        record: &Value,
        fieldlist: Option<&[String]>,
    ) -> SyncResult<PushOutcome> {
        self.inner.update_on_server(record, fieldlist)
    }

    fn delete_on_server(&self, record: &Value) -> SyncResult<PushOutcome> {
        self.inner.delete_on_server(record)
    }

    fn as_batch(&self) -> Option<&dyn BatchPushTarget> {
        Some(self)
    }
}

impl BatchPushTarget for ScriptedBatchPushTarget {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn are_newer_than_server(&self, records: &[Value]) -> SyncResult<Vec<bool>> {
        self.checks.lock().push(records.len());
        records
            .iter()
            .map(|r| self.inner.is_newer_than_server(r))
            .collect()
    }

    fn push_batch(
        &self,
        store: &dyn LocalStore,
        collection: &str,
        records: &[Value],
        fieldlist: Option<&[String]>,
        merge_mode: MergeMode,
    ) -> SyncResult<()> {
        self.batches
            .lock()
            .push(records.iter().map(label).collect());
        for record in records {
            self.reconcile(store, collection, record, fieldlist, merge_mode)?;
        }
        Ok(())
    }
}
