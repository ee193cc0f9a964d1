//! CLI command implementations.

pub mod collections;
pub mod delete;
pub mod list;
pub mod recover;
pub mod show;

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tidesync_engine::{SyncKey, SyncStateStore, SyncStatus};
use tidesync_store::{FileStore, LocalStore};

/// Opens the store at `path` and the job records in `syncs`.
pub fn open_states(path: &Path, syncs: &str) -> Result<SyncStateStore, Box<dyn std::error::Error>> {
    let store = FileStore::open(path, false)?;
    if !store.has_collection(syncs)? {
        let msg = format!("No job records found at {path:?} (collection {syncs:?})");
        return Err(msg.into());
    }
    Ok(SyncStateStore::new(Arc::new(store), syncs))
}

/// Reads a job reference.
///
/// `id:<n>` and `name:<text>` say explicitly which one is meant, so a job
/// whose name is all digits stays reachable. Without a prefix, digits are
/// an id and anything else a name.
pub fn parse_key(job: &str) -> Result<SyncKey, String> {
    if let Some(name) = job.strip_prefix("name:") {
        return Ok(SyncKey::Name(name.to_string()));
    }
    if let Some(id) = job.strip_prefix("id:") {
        return id
            .parse::<i64>()
            .map(SyncKey::Id)
            .map_err(|_| format!("invalid job id: {id}"));
    }
    Ok(match job.parse::<i64>() {
        Ok(id) => SyncKey::Id(id),
        Err(_) => SyncKey::Name(job.to_string()),
    })
}

/// Parses a status name, case-insensitively.
pub fn parse_status(status: &str) -> Result<SyncStatus, String> {
    serde_json::from_value(Value::String(status.to_ascii_uppercase()))
        .map_err(|_| format!("unknown status: {status}"))
}
