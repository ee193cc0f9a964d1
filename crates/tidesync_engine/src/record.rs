//! Local-change flags carried by synced records.
//!
//! Every record in a synced collection carries a set of boolean flags
//! describing what happened to it locally since the last sync:
//!
//! | Key                    | Meaning                               |
//! |------------------------|---------------------------------------|
//! | `__local__`            | Record has unsynced local changes     |
//! | `__locally_created__`  | Record was created on this device     |
//! | `__locally_updated__`  | Record was modified on this device    |
//! | `__locally_deleted__`  | Record was deleted on this device     |
//! | `__last_error__`       | Error text of the last failed push    |
//! | `__sync_id__`          | Id of the pull job that saved it      |

use serde_json::Value;
use tidesync_store::{EntryId, ENTRY_ID};

/// Record has unsynced local changes.
pub const LOCAL: &str = "__local__";
/// Record was created locally.
pub const LOCALLY_CREATED: &str = "__locally_created__";
/// Record was updated locally.
pub const LOCALLY_UPDATED: &str = "__locally_updated__";
/// Record was deleted locally.
pub const LOCALLY_DELETED: &str = "__locally_deleted__";
/// Error text of the last failed push of this record.
pub const LAST_ERROR: &str = "__last_error__";
/// Id of the pull job that last saved this record.
pub const SYNC_ID: &str = "__sync_id__";

/// Reads a boolean flag; a missing or non-boolean value is false.
pub fn flag(record: &Value, key: &str) -> bool {
    record.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Returns true if the record has unsynced local changes.
pub fn is_dirty(record: &Value) -> bool {
    flag(record, LOCAL)
}

/// Marks a record as created on this device.
pub fn mark_locally_created(record: &mut Value) {
    set_flags(record, true, false, false);
}

/// Marks a record as updated on this device.
///
/// A record created locally and then edited stays "created".
pub fn mark_locally_updated(record: &mut Value) {
    let created = flag(record, LOCALLY_CREATED);
    set_flags(record, created, !created, false);
}

/// Marks a record as deleted on this device.
pub fn mark_locally_deleted(record: &mut Value) {
    let created = flag(record, LOCALLY_CREATED);
    let updated = flag(record, LOCALLY_UPDATED);
    set_flags(record, created, updated, true);
}

/// Clears every local-change flag and the last error.
pub fn mark_clean(record: &mut Value) {
    if let Some(object) = record.as_object_mut() {
        object.insert(LOCAL.into(), Value::Bool(false));
        object.insert(LOCALLY_CREATED.into(), Value::Bool(false));
        object.insert(LOCALLY_UPDATED.into(), Value::Bool(false));
        object.insert(LOCALLY_DELETED.into(), Value::Bool(false));
        object.remove(LAST_ERROR);
    }
}

/// Records the error of a failed push, keeping the local-change flags.
pub fn set_last_error(record: &mut Value, error: &str) {
    if let Some(object) = record.as_object_mut() {
        object.insert(LAST_ERROR.into(), Value::String(error.to_string()));
    }
}

/// Error text of the last failed push, if any.
pub fn last_error(record: &Value) -> Option<&str> {
    record.get(LAST_ERROR).and_then(Value::as_str)
}

/// Entry id the local store assigned to the record.
pub fn entry_id(record: &Value) -> Option<EntryId> {
    record.get(ENTRY_ID).and_then(Value::as_i64)
}

/// Server id of the record under `id_field`, as a string.
///
/// Numeric ids are rendered in decimal; other types have no id.
pub fn server_id(record: &Value, id_field: &str) -> Option<String> {
    match record.get(id_field)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn set_flags(record: &mut Value, created: bool, updated: bool, deleted: bool) {
    if let Some(object) = record.as_object_mut() {
        object.insert(LOCAL.into(), Value::Bool(true));
        object.insert(LOCALLY_CREATED.into(), Value::Bool(created));
        object.insert(LOCALLY_UPDATED.into(), Value::Bool(updated));
        object.insert(LOCALLY_DELETED.into(), Value::Bool(deleted));
    }
}
