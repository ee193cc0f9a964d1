//! Delete command implementation.

use super::{open_states, parse_key};
use std::path::Path;
use tidesync_engine::{SyncKey, SyncResult, SyncStateStore};
use tracing::info;

/// Deletes the job record for `key`. Returns true if it existed.
pub fn delete(states: &SyncStateStore, key: &SyncKey) -> SyncResult<bool> {
    match key {
        SyncKey::Id(id) => states.delete_by_id(*id),
        SyncKey::Name(name) => states.delete_by_name(name),
    }
}

/// Runs the delete command.
pub fn run(path: &Path, syncs: &str, job: &str) -> Result<(), Box<dyn std::error::Error>> {
    let states = open_states(path, syncs)?;
    let key = parse_key(job)?;
    if !delete(&states, &key)? {
        return Err(format!("No job found with {key}").into());
    }
    info!(job = %key, "job record deleted");
    println!("Deleted job with {key}");
    Ok(())
}
