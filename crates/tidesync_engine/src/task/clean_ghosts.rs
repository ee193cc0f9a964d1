//! Ghost cleanup for pull jobs.

use super::{GhostCallback, Job};
use crate::error::SyncResult;
use crate::manager::Shared;
use crate::state::SyncState;
use crate::target::PullTarget;
use std::sync::Arc;
use tracing::{info, warn};

/// Removes local records of a pull job that were deleted on the server.
///
/// The job record itself is never modified.
pub(crate) struct CleanGhostsTask {
    shared: Arc<Shared>,
    sync: SyncState,
    target: Arc<dyn PullTarget>,
    callback: GhostCallback,
    generation: u64,
}

impl CleanGhostsTask {
    /// Registers the job as active.
    pub(crate) fn new(
        shared: Arc<Shared>,
        sync: SyncState,
        target: Arc<dyn PullTarget>,
        callback: GhostCallback,
    ) -> SyncResult<Self> {
        let generation = shared.register_active(sync.id())?;
        Ok(Self {
            shared,
            sync,
            target,
            callback,
            generation,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    fn clean(&self) -> SyncResult<usize> {
        self.shared.check_accepting(self.generation)?;
        self.target.clean_ghosts(
            self.shared.store(),
            self.sync.collection_name(),
            self.sync.id(),
        )
    }
}

impl Job for CleanGhostsTask {
    fn execute(self: Box<Self>) {
        let sync_id = self.sync.id();
        let result = self.clean();
        match &result {
            Ok(removed) => info!(sync_id, removed, "ghosts cleaned"),
            Err(e) => warn!(sync_id, error = %e, "ghost cleanup failed"),
        }

        let Self {
            shared,
            callback,
            generation,
            ..
        } = *self;
        shared.remove_active(sync_id, generation);
        callback(result);
    }
}
