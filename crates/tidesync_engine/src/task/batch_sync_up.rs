//! Batched push strategy.

use super::{SyncStrategy, TaskContext};
use crate::error::{SyncError, SyncResult};
use crate::options::{MergeMode, SyncOptions};
use crate::state::SyncStatus;
use crate::target::{BatchPushTarget, PushTarget};
use serde_json::Value;
use std::sync::Arc;
use tidesync_store::LocalStore;
use tracing::debug;

/// Pushes dirty records in batches of at most `max_batch_size`.
pub(crate) struct BatchSyncUpStrategy {
    target: Arc<dyn PushTarget>,
}

impl BatchSyncUpStrategy {
    /// The target must expose the batch capability.
    pub(crate) fn new(target: Arc<dyn PushTarget>) -> Self {
        Self { target }
    }
}

impl SyncStrategy for BatchSyncUpStrategy {
    fn run_sync(&mut self, ctx: &mut TaskContext) -> SyncResult<()> {
        let target = self
            .target
            .as_batch()
            .ok_or_else(|| SyncError::target("push target does not support batches"))?;
        let sync_id = ctx.sync().id();
        let collection = ctx.sync().collection_name().to_string();
        let options = ctx.sync().options().clone();
        let max_batch_size = target.max_batch_size().max(1);

        let dirty = target.dirty_ids(ctx.store(), &collection)?;
        let total = dirty.len();
        ctx.sync_mut().set_total_size(total as i64);
        ctx.update_sync(SyncStatus::Running, Some(0));

        let mut batch = Vec::with_capacity(max_batch_size.min(total));
        for (index, entry_id) in dirty.iter().enumerate() {
            ctx.check_if_stop_requested()?;

            match target.fetch_local(ctx.store(), &collection, *entry_id)? {
                Some(record) => batch.push(record),
                None => debug!(sync_id, entry_id, "dirty record vanished"),
            }

            if batch.len() >= max_batch_size || index + 1 == total {
                ctx.check_if_stop_requested()?;
                flush(
                    target,
                    ctx.store(),
                    &collection,
                    std::mem::take(&mut batch),
                    &options,
                )?;
            }

            ctx.report_record_progress(index, total);
        }
        Ok(())
    }
}

fn flush(
    target: &dyn BatchPushTarget,
    store: &dyn LocalStore,
    collection: &str,
    records: Vec<Value>,
    options: &SyncOptions,
) -> SyncResult<()> {
    let records = match options.merge_mode() {
        MergeMode::LeaveIfChanged => drop_stale(target, records)?,
        MergeMode::Overwrite => records,
    };
    if records.is_empty() {
        return Ok(());
    }

    debug!(collection, size = records.len(), "pushing batch");
    target.push_batch(
        store,
        collection,
        &records,
        options.fieldlist(),
        options.merge_mode(),
    )
}

/// Drops records whose server copy changed, keeping the batch order.
fn drop_stale(target: &dyn BatchPushTarget, records: Vec<Value>) -> SyncResult<Vec<Value>> {
    let candidates: Vec<Value> = records
        .iter()
        .filter(|r| !target.is_locally_created(r))
        .cloned()
        .collect();
    if candidates.is_empty() {
        return Ok(records);
    }

    let verdicts = target.are_newer_than_server(&candidates)?;
    if verdicts.len() != candidates.len() {
        return Err(SyncError::target(format!(
            "staleness check returned {} answers for {} records",
            verdicts.len(),
            candidates.len()
        )));
    }

    let mut verdicts = verdicts.into_iter();
    Ok(records
        .into_iter()
        .filter(|r| {
            target.is_locally_created(r) || verdicts.next().unwrap_or(false)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::target::PushOutcome;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Batches {
        stale: Vec<&'static str>,
        pushed: Mutex<Vec<Vec<String>>>,
        checked: Mutex<Vec<usize>>,
    }

    impl Batches {
        fn new(stale: Vec<&'static str>) -> Self {
            Self {
                stale,
                pushed: Mutex::new(Vec::new()),
                checked: Mutex::new(Vec::new()),
            }
        }
    }

    impl PushTarget for Batches {
        fn descriptor(&self) -> Value {
            json!({"kind": "batches"})
        }
        fn is_newer_than_server(&self, record: &Value) -> SyncResult<bool> {
            Ok(!self.stale.iter().any(|s| record["Name"] == json!(s)))
        }
        fn create_on_server(&self, _: &Value, _: Option<&[String]>) -> SyncResult<PushOutcome> {
            unreachable!("batched target")
        }
        fn update_on_server(&self, _: &Value, _: Option<&[String]>) -> SyncResult<PushOutcome> {
            unreachable!("batched target")
        }
        fn delete_on_server(&self, _: &Value) -> SyncResult<PushOutcome> {
            unreachable!("batched target")
        }
        fn as_batch(&self) -> Option<&dyn BatchPushTarget> {
            Some(self)
        }
    }

    impl BatchPushTarget for Batches {
        fn max_batch_size(&self) -> usize {
            2
        }
        fn are_newer_than_server(&self, records: &[Value]) -> SyncResult<Vec<bool>> {
            self.checked.lock().push(records.len());
            records
                .iter()
                .map(|r| self.is_newer_than_server(r))
                .collect()
        }
        fn push_batch(
            &self,
            _: &dyn LocalStore,
            _: &str,
            records: &[Value],
            _: Option<&[String]>,
            _: MergeMode,
        ) -> SyncResult<()> {
            self.pushed.lock().push(
                records
                    .iter()
                    .map(|r| r["Name"].as_str().unwrap_or_default().to_string())
                    .collect(),
            );
            Ok(())
        }
    }

    fn updated(name: &str) -> Value {
        let mut record = json!({"Name": name});
        record::mark_locally_updated(&mut record);
        record
    }

    fn created(name: &str) -> Value {
        let mut record = json!({"Name": name});
        record::mark_locally_created(&mut record);
        record
    }

    #[test]
    fn stale_records_are_dropped_in_order() {
        let target = Batches::new(vec!["b"]);
        let records = vec![updated("a"), updated("b"), created("c"), updated("d")];

        let kept = drop_stale(&target, records).unwrap();
        let names: Vec<&str> = kept.iter().filter_map(|r| r["Name"].as_str()).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
        assert_eq!(*target.checked.lock(), vec![3]);
    }

    #[test]
    fn created_only_batch_skips_check() {
        let target = Batches::new(vec![]);
        let kept = drop_stale(&target, vec![created("x")]).unwrap();
        assert_eq!(kept.len(), 1);
        assert!(target.checked.lock().is_empty());
    }

    #[test]
    fn overwrite_flush_pushes_everything() {
        let target = Batches::new(vec!["a"]);
        let store = tidesync_store::MemoryStore::new();
        let options = SyncOptions::overwrite();
        flush(&target, &store, "c", vec![updated("a")], &options).unwrap();
        assert_eq!(*target.pushed.lock(), vec![vec!["a".to_string()]]);
        assert!(target.checked.lock().is_empty());
    }

    #[test]
    fn empty_batch_after_check_is_not_pushed() {
        let target = Batches::new(vec!["a"]);
        let store = tidesync_store::MemoryStore::new();
        let options = SyncOptions::leave_if_changed();
        flush(&target, &store, "c", vec![updated("a")], &options).unwrap();
        assert!(target.pushed.lock().is_empty());
    }
}
