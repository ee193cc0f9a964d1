//! Sync task template and job kinds.
//!
//! Every pull and push job runs through [`SyncTask`], which owns the
//! lifecycle shared by all of them:
//!
//! 1. On construction the task registers its job as active, moves it to
//!    RUNNING with progress 0, persists it and notifies the callback.
//! 2. On execution it checks for a stop request, then runs its
//!    [`SyncStrategy`].
//! 3. The outcome maps to a terminal status: success to DONE/100, the stop
//!    signal to STOPPED, any other error to FAILED with the error recorded.
//!    Revoked credentials leave the job untouched.
//!
//! Ghost cleanup has a lifecycle of its own and lives in
//! [`clean_ghosts`].

pub(crate) mod batch_sync_up;
pub(crate) mod clean_ghosts;
pub(crate) mod sync_down;
pub(crate) mod sync_up;

use crate::error::SyncResult;
use crate::manager::Shared;
use crate::state::{SyncState, SyncStatus};
use std::sync::Arc;
use tidesync_store::LocalStore;
use tracing::{debug, error, info, warn};

/// Receives every state change of a running job.
pub type SyncCallback = Arc<dyn Fn(&SyncState) + Send + Sync>;

/// Receives the outcome of a ghost cleanup: the number of records removed.
pub type GhostCallback = Box<dyn FnOnce(SyncResult<usize>) + Send>;

/// Unit of work executed by the worker.
pub(crate) trait Job: Send {
    fn execute(self: Box<Self>);
}

/// The job-specific part of a sync task.
pub(crate) trait SyncStrategy: Send {
    fn run_sync(&mut self, ctx: &mut TaskContext) -> SyncResult<()>;
}

/// Everything a strategy may touch while it runs.
pub(crate) struct TaskContext {
    shared: Arc<Shared>,
    sync: SyncState,
    callback: SyncCallback,
    generation: u64,
}

impl TaskContext {
    pub(crate) fn sync(&self) -> &SyncState {
        &self.sync
    }

    pub(crate) fn sync_mut(&mut self) -> &mut SyncState {
        &mut self.sync
    }

    pub(crate) fn store(&self) -> &dyn LocalStore {
        self.shared.store()
    }

    /// Fails with the stop signal unless the manager accepts syncs.
    pub(crate) fn check_if_stop_requested(&self) -> SyncResult<()> {
        self.shared.check_accepting(self.generation)
    }

    /// Applies a status and optional progress, persists, deregisters the job
    /// once it leaves RUNNING, then notifies the callback.
    pub(crate) fn update_sync(&mut self, status: SyncStatus, progress: Option<u8>) {
        self.sync.set_status(status);
        if let Some(progress) = progress {
            self.sync.set_progress(progress);
        }

        if let Err(e) = self.shared.states().save(&self.sync) {
            warn!(sync_id = self.sync.id(), error = %e, "failed to save sync state");
        }

        if status != SyncStatus::Running {
            self.shared.remove_active(self.sync.id(), self.generation);
        }

        debug!(
            sync_id = self.sync.id(),
            status = %status,
            progress = self.sync.progress(),
            "sync updated"
        );
        (self.callback)(&self.sync);
    }

    /// Reports progress after the record at `index` (0-based) of `total`.
    ///
    /// Completion is left to the terminal update.
    pub(crate) fn report_record_progress(&mut self, index: usize, total: usize) {
        if total == 0 {
            return;
        }
        let progress = (index + 1) * 100 / total;
        if progress < 100 {
            self.update_sync(SyncStatus::Running, Some(progress as u8));
        }
    }
}

/// A pull or push job bound to its strategy.
pub(crate) struct SyncTask<S> {
    ctx: TaskContext,
    strategy: S,
}

impl<S: SyncStrategy> SyncTask<S> {
    /// Registers the job as active and moves it to RUNNING.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyRunning` or `ManagerStopped` without touching the
    /// job.
    pub(crate) fn new(
        shared: Arc<Shared>,
        mut sync: SyncState,
        callback: SyncCallback,
        strategy: S,
    ) -> SyncResult<Self> {
        let generation = shared.register_active(sync.id())?;
        sync.set_total_size(-1);

        let mut ctx = TaskContext {
            shared,
            sync,
            callback,
            generation,
        };
        ctx.update_sync(SyncStatus::Running, Some(0));
        Ok(Self { ctx, strategy })
    }

    /// Snapshot of the job as of construction.
    pub(crate) fn sync(&self) -> &SyncState {
        &self.ctx.sync
    }

    /// Manager generation the job was registered under.
    pub(crate) fn generation(&self) -> u64 {
        self.ctx.generation
    }

    fn run(mut self) {
        let sync_id = self.ctx.sync.id();
        let generation = self.ctx.generation;
        if self.ctx.shared.is_superseded(sync_id, generation) {
            debug!(sync_id, generation, "stale sync from before reset dropped");
            return;
        }

        let result = match self.ctx.check_if_stop_requested() {
            Ok(()) => self.strategy.run_sync(&mut self.ctx),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.ctx.update_sync(SyncStatus::Done, Some(100));
                let total_size = self.ctx.sync.total_size();
                info!(sync_id, total_size, "sync done");
            }
            Err(e) if e.is_stop_signal() => {
                info!(sync_id, progress = self.ctx.sync.progress(), "sync stopped");
                self.ctx.update_sync(SyncStatus::Stopped, None);
            }
            Err(e) if e.is_auth_revoked() => {
                warn!(sync_id, error = %e, "credentials revoked during sync");
                (self.ctx.callback)(&self.ctx.sync);
            }
            Err(e) => {
                error!(sync_id, error = %e, "sync failed");
                self.ctx.sync.set_error(e.to_string());
                self.ctx.update_sync(SyncStatus::Failed, None);
            }
        }
    }
}

impl<S: SyncStrategy> Job for SyncTask<S> {
    fn execute(self: Box<Self>) {
        (*self).run();
    }
}
