//! Pull strategy: server to local collection.

use super::{SyncStrategy, TaskContext};
use crate::error::SyncResult;
use crate::options::MergeMode;
use crate::record;
use crate::state::SyncStatus;
use crate::target::{Page, PullTarget};
use std::sync::Arc;
use tracing::debug;

/// Fetches remote records page by page and saves them locally.
///
/// Under `LEAVE_IF_CHANGED`, records with unsynced local changes are not
/// overwritten. The watermark advances to the newest modification time
/// seen; if the target returns pages in modification order it is persisted
/// after every page so a stopped run resumes from there.
pub(crate) struct SyncDownStrategy {
    target: Arc<dyn PullTarget>,
}

impl SyncDownStrategy {
    pub(crate) fn new(target: Arc<dyn PullTarget>) -> Self {
        Self { target }
    }
}

impl SyncStrategy for SyncDownStrategy {
    fn run_sync(&mut self, ctx: &mut TaskContext) -> SyncResult<()> {
        let sync_id = ctx.sync().id();
        let collection = ctx.sync().collection_name().to_string();
        let merge_mode = ctx.sync().options().merge_mode();
        let mut watermark = ctx.sync().watermark();

        let first = self.target.start_fetch(watermark)?;
        let total_size = first.total_size;
        ctx.sync_mut().set_total_size(total_size);
        ctx.update_sync(SyncStatus::Running, Some(0));

        let ids_to_skip = match merge_mode {
            MergeMode::LeaveIfChanged => Some(self.target.ids_to_skip(ctx.store(), &collection)?),
            MergeMode::Overwrite => None,
        };
        let id_field = self.target.id_field_name().to_string();
        let ordered = self.target.is_page_order_guaranteed_by_mod_time();

        let mut count_saved: i64 = 0;
        let mut page = Some(first);
        while let Some(Page { records, next, .. }) = page {
            ctx.check_if_stop_requested()?;

            let fetched = records.len();
            let latest = self.target.latest_modification_timestamp(&records);
            let records: Vec<_> = match &ids_to_skip {
                Some(skip) => records
                    .into_iter()
                    .filter(|r| {
                        record::server_id(r, &id_field).is_none_or(|id| !skip.contains(&id))
                    })
                    .collect(),
                None => records,
            };
            debug!(
                sync_id,
                collection = %collection,
                fetched,
                saved = records.len(),
                "saving page"
            );
            self.target
                .save_records_to_local_store(ctx.store(), &collection, records, sync_id)?;

            count_saved += fetched as i64;
            watermark = watermark.max(latest);
            if ordered {
                ctx.sync_mut().set_watermark(watermark);
            }

            if count_saved < total_size {
                let progress = count_saved * 100 / total_size;
                ctx.update_sync(SyncStatus::Running, Some(progress as u8));
            }

            page = match next {
                Some(cursor) => self.target.continue_fetch(&cursor)?,
                None => None,
            };
        }

        ctx.sync_mut().set_watermark(watermark);
        Ok(())
    }
}
