//! Push strategy: local changes to the server, one record at a time.

use super::{SyncStrategy, TaskContext};
use crate::error::SyncResult;
use crate::options::{MergeMode, SyncOptions};
use crate::state::SyncStatus;
use crate::target::{PushOutcome, PushTarget};
use serde_json::Value;
use std::sync::Arc;
use tidesync_store::LocalStore;
use tracing::debug;

/// What a dirty record needs on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Update,
    Delete,
}

fn action_for(target: &dyn PushTarget, record: &Value) -> Option<Action> {
    if target.is_locally_deleted(record) {
        Some(Action::Delete)
    } else if target.is_locally_created(record) {
        Some(Action::Create)
    } else if target.is_locally_updated(record) {
        Some(Action::Update)
    } else {
        None
    }
}

/// Whether a record should be pushed under the given merge mode.
///
/// Under `LEAVE_IF_CHANGED` a record the server changed since the client
/// last saw it is left alone. Records created locally have no server copy
/// and are always pushed.
pub(crate) fn should_push(
    target: &dyn PushTarget,
    record: &Value,
    merge_mode: MergeMode,
) -> SyncResult<bool> {
    match merge_mode {
        MergeMode::Overwrite => Ok(true),
        MergeMode::LeaveIfChanged => {
            if target.is_locally_created(record) {
                Ok(true)
            } else {
                target.is_newer_than_server(record)
            }
        }
    }
}

/// Pushes one record and reconciles the local copy with the outcome.
pub(crate) fn push_one(
    target: &dyn PushTarget,
    store: &dyn LocalStore,
    collection: &str,
    record: Value,
    options: &SyncOptions,
) -> SyncResult<()> {
    let Some(action) = action_for(target, &record) else {
        return Ok(());
    };

    match action {
        Action::Create => create_and_write_back(target, store, collection, record, options),
        Action::Delete => {
            let outcome = if target.is_locally_created(&record) {
                PushOutcome::NotFound
            } else {
                target.delete_on_server(&record)?
            };
            match outcome {
                PushOutcome::Rejected(message) => {
                    target.save_with_last_error(store, collection, record, &message)
                }
                _ => target.delete_from_local_store(store, collection, &record),
            }
        }
        Action::Update => {
            let fieldlist = target.update_fieldlist().or(options.fieldlist());
            match target.update_on_server(&record, fieldlist)? {
                PushOutcome::Success | PushOutcome::Created(_) => {
                    target.clean_and_save_in_local_store(store, collection, record)
                }
                PushOutcome::NotFound => match options.merge_mode() {
                    MergeMode::Overwrite => {
                        create_and_write_back(target, store, collection, record, options)
                    }
                    MergeMode::LeaveIfChanged => {
                        debug!(collection, "record deleted on server, left unchanged");
                        Ok(())
                    }
                },
                PushOutcome::Rejected(message) => {
                    target.save_with_last_error(store, collection, record, &message)
                }
            }
        }
    }
}

fn create_and_write_back(
    target: &dyn PushTarget,
    store: &dyn LocalStore,
    collection: &str,
    mut record: Value,
    options: &SyncOptions,
) -> SyncResult<()> {
    let fieldlist = target.create_fieldlist().or(options.fieldlist());
    match target.create_on_server(&record, fieldlist)? {
        PushOutcome::Created(server_id) => {
            if let Some(object) = record.as_object_mut() {
                object.insert(target.id_field_name().to_string(), Value::String(server_id));
            }
            target.clean_and_save_in_local_store(store, collection, record)
        }
        PushOutcome::Rejected(message) => {
            target.save_with_last_error(store, collection, record, &message)
        }
        PushOutcome::Success | PushOutcome::NotFound => target.save_with_last_error(
            store,
            collection,
            record,
            "server did not return an id for the created record",
        ),
    }
}

/// Pushes dirty records one by one.
pub(crate) struct SyncUpStrategy {
    target: Arc<dyn PushTarget>,
}

impl SyncUpStrategy {
    pub(crate) fn new(target: Arc<dyn PushTarget>) -> Self {
        Self { target }
    }
}

impl SyncStrategy for SyncUpStrategy {
    fn run_sync(&mut self, ctx: &mut TaskContext) -> SyncResult<()> {
        let sync_id = ctx.sync().id();
        let collection = ctx.sync().collection_name().to_string();
        let options = ctx.sync().options().clone();

        let dirty = self.target.dirty_ids(ctx.store(), &collection)?;
        let total = dirty.len();
        ctx.sync_mut().set_total_size(total as i64);
        ctx.update_sync(SyncStatus::Running, Some(0));

        for (index, entry_id) in dirty.iter().enumerate() {
            ctx.check_if_stop_requested()?;

            let target = &*self.target;
            match target.fetch_local(ctx.store(), &collection, *entry_id)? {
                Some(record) => {
                    if should_push(&*self.target, &record, options.merge_mode())? {
                        push_one(&*self.target, ctx.store(), &collection, record, &options)?;
                    } else {
                        debug!(sync_id, entry_id, "server copy changed, record skipped");
                    }
                }
                None => debug!(sync_id, entry_id, "dirty record vanished"),
            }

            ctx.report_record_progress(index, total);
        }
        Ok(())
    }
}
