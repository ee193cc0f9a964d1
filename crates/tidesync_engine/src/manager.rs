//! Sync manager: job factory, scheduler and stop/restart control.
//!
//! The manager owns:
//! - The job records, through a [`SyncStateStore`]
//! - The registry of active jobs and the accept flag
//! - A single worker thread executing tasks in submission order
//!
//! ```text
//!                   stop()            last active job ends
//! ACCEPTING_SYNCS ─────────► STOP_REQUESTED ─────────────► STOPPED
//!        ▲                        │                            │
//!        └──────── restart() ─────┴────────── restart() ───────┘
//! ```
//!
//! Running jobs observe a stop request at their next checkpoint (between
//! pages, records or batches) and end STOPPED.

use crate::config::ManagerConfig;
use crate::error::{SyncError, SyncResult};
use crate::options::SyncOptions;
use crate::record::{LOCAL, SYNC_ID};
use crate::state::{SyncKey, SyncState, SyncStateStore, SyncStatus, SyncType};
use crate::target::{PullTarget, PushTarget, TargetFactory};
use crate::task::batch_sync_up::BatchSyncUpStrategy;
use crate::task::clean_ghosts::CleanGhostsTask;
use crate::task::sync_down::SyncDownStrategy;
use crate::task::sync_up::SyncUpStrategy;
use crate::task::{GhostCallback, Job, SyncCallback, SyncStrategy, SyncTask};
use crate::worker::Worker;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tidesync_store::{IndexSpec, LocalStore};
use tracing::{debug, info, warn};

/// Whether the manager accepts new jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Jobs can be submitted.
    AcceptingSyncs,
    /// A stop was requested while jobs were still active.
    StopRequested,
    /// No job is active and none is accepted.
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::AcceptingSyncs => f.write_str("ACCEPTING_SYNCS"),
            ManagerState::StopRequested => f.write_str("STOP_REQUESTED"),
            ManagerState::Stopped => f.write_str("STOPPED"),
        }
    }
}

struct Control {
    state: ManagerState,
    active: HashSet<i64>,
    /// Bumped by `reset`; tasks registered before it are expired.
    generation: u64,
}

/// State shared between the manager and its tasks.
pub(crate) struct Shared {
    store: Arc<dyn LocalStore>,
    states: SyncStateStore,
    control: Mutex<Control>,
}

impl Shared {
    pub(crate) fn new(store: Arc<dyn LocalStore>, syncs_collection: &str) -> Self {
        Self {
            states: SyncStateStore::new(Arc::clone(&store), syncs_collection),
            store,
            control: Mutex::new(Control {
                state: ManagerState::AcceptingSyncs,
                active: HashSet::new(),
                generation: 0,
            }),
        }
    }

    pub(crate) fn store(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }

    pub(crate) fn states(&self) -> &SyncStateStore {
        &self.states
    }

    pub(crate) fn manager_state(&self) -> ManagerState {
        self.control.lock().state
    }

    pub(crate) fn is_active(&self, id: i64) -> bool {
        self.control.lock().active.contains(&id)
    }

    /// Fails unless the job could be registered right now.
    pub(crate) fn ensure_can_run(&self, id: i64) -> SyncResult<()> {
        let control = self.control.lock();
        Self::admit(&control, id)
    }

    /// Adds the job to the active registry and returns the generation it
    /// was registered under.
    pub(crate) fn register_active(&self, id: i64) -> SyncResult<u64> {
        let mut control = self.control.lock();
        Self::admit(&control, id)?;
        control.active.insert(id);
        Ok(control.generation)
    }

    /// Returns true if a reset happened after `generation` and the job has
    /// since been registered again.
    pub(crate) fn is_superseded(&self, id: i64, generation: u64) -> bool {
        let control = self.control.lock();
        control.generation != generation && control.active.contains(&id)
    }

    fn admit(control: &Control, id: i64) -> SyncResult<()> {
        if control.active.contains(&id) {
            return Err(SyncError::AlreadyRunning { id });
        }
        if control.state != ManagerState::AcceptingSyncs {
            return Err(SyncError::ManagerStopped {
                state: control.state,
            });
        }
        Ok(())
    }

    /// Removes the job from the active registry, completing a pending stop
    /// when it was the last one.
    ///
    /// Registrations from before a reset are already gone and are ignored.
    pub(crate) fn remove_active(&self, id: i64, generation: u64) {
        let mut control = self.control.lock();
        if control.generation != generation {
            return;
        }
        control.active.remove(&id);
        if control.state == ManagerState::StopRequested && control.active.is_empty() {
            control.state = ManagerState::Stopped;
            info!("sync manager stopped");
        }
    }

    /// The cancellation checkpoint.
    ///
    /// Tasks registered before the last reset always fail it.
    pub(crate) fn check_accepting(&self, generation: u64) -> SyncResult<()> {
        let control = self.control.lock();
        if control.generation != generation {
            return Err(SyncError::Stopped {
                state: ManagerState::Stopped,
            });
        }
        match control.state {
            ManagerState::AcceptingSyncs => Ok(()),
            state => Err(SyncError::Stopped { state }),
        }
    }

    pub(crate) fn request_stop(&self) -> ManagerState {
        let mut control = self.control.lock();
        control.state = if control.active.is_empty() {
            ManagerState::Stopped
        } else {
            ManagerState::StopRequested
        };
        control.state
    }

    pub(crate) fn resume(&self) -> bool {
        let mut control = self.control.lock();
        if control.state == ManagerState::AcceptingSyncs {
            return false;
        }
        control.state = ManagerState::AcceptingSyncs;
        true
    }

    fn active_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.control.lock().active.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn reset(&self) {
        let mut control = self.control.lock();
        control.state = ManagerState::Stopped;
        control.active.clear();
        control.generation += 1;
    }
}

/// A target already resolved for a job.
enum ResolvedTarget {
    Pull(Arc<dyn PullTarget>),
    Push(Arc<dyn PushTarget>),
}

/// Creates, runs, stops and resumes sync jobs against one local store.
///
/// All tasks execute on one worker thread, in submission order. Callbacks
/// run on the calling thread for the initial RUNNING notification and on
/// the worker thread afterwards.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tidesync_engine::{ManagerConfig, SyncManager, TargetRegistry};
/// use tidesync_store::MemoryStore;
///
/// let manager = SyncManager::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(TargetRegistry::new()),
///     ManagerConfig::default(),
/// )
/// .unwrap();
/// assert!(manager.active_syncs().is_empty());
/// ```
pub struct SyncManager {
    shared: Arc<Shared>,
    targets: Arc<dyn TargetFactory>,
    worker: Worker,
    config: ManagerConfig,
}

impl SyncManager {
    /// Creates a manager and starts its worker.
    ///
    /// Registers the job collection if needed and, unless disabled in the
    /// config, marks jobs left RUNNING by a previous process as STOPPED.
    pub fn new(
        store: Arc<dyn LocalStore>,
        targets: Arc<dyn TargetFactory>,
        config: ManagerConfig,
    ) -> SyncResult<Self> {
        let shared = Arc::new(Shared::new(store, &config.syncs_collection));
        shared.states().setup_collection()?;
        if config.recover_interrupted {
            let recovered = shared.states().recover_interrupted()?;
            if recovered > 0 {
                info!(recovered, "recovered interrupted syncs");
            }
        }

        let worker = Worker::spawn(&config.worker_name)?;
        info!(collection = %config.syncs_collection, "sync manager started");
        Ok(Self {
            shared,
            targets,
            worker,
            config,
        })
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The local store.
    pub fn store(&self) -> &dyn LocalStore {
        self.shared.store()
    }

    /// Accessor for the persisted job records.
    pub fn states(&self) -> &SyncStateStore {
        self.shared.states()
    }

    /// Current manager state.
    pub fn state(&self) -> ManagerState {
        self.shared.manager_state()
    }

    /// Returns true while a stop waits for active jobs to finish.
    pub fn is_stopping(&self) -> bool {
        self.state() == ManagerState::StopRequested
    }

    /// Returns true once the manager is fully stopped.
    pub fn is_stopped(&self) -> bool {
        self.state() == ManagerState::Stopped
    }

    /// Ids of the active jobs, sorted.
    pub fn active_syncs(&self) -> Vec<i64> {
        self.shared.active_ids()
    }

    /// Returns true if the job is registered as active.
    pub fn is_sync_running(&self, id: i64) -> bool {
        self.shared.is_active(id)
    }

    // -- job records --

    /// Persists a new pull job.
    pub fn create_pull(
        &self,
        target: &dyn PullTarget,
        options: SyncOptions,
        collection_name: &str,
        name: Option<&str>,
    ) -> SyncResult<SyncState> {
        self.setup_local_collection(collection_name, target.id_field_name())?;
        self.states().create(
            SyncType::Pull,
            target.descriptor(),
            options,
            collection_name,
            name,
        )
    }

    /// Persists a new push job.
    pub fn create_push(
        &self,
        target: &dyn PushTarget,
        options: SyncOptions,
        collection_name: &str,
        name: Option<&str>,
    ) -> SyncResult<SyncState> {
        self.setup_local_collection(collection_name, target.id_field_name())?;
        self.states().create(
            SyncType::Push,
            target.descriptor(),
            options,
            collection_name,
            name,
        )
    }

    fn setup_local_collection(&self, collection: &str, id_field: &str) -> SyncResult<()> {
        self.store().register_collection(
            collection,
            &[
                IndexSpec::new(id_field),
                IndexSpec::new(LOCAL),
                IndexSpec::new(SYNC_ID),
            ],
        )?;
        Ok(())
    }

    /// Loads a job by id or name.
    pub fn get_sync_status(&self, key: impl Into<SyncKey>) -> SyncResult<Option<SyncState>> {
        self.states().get(&key.into())
    }

    /// Loads a job by name.
    pub fn get_sync_status_by_name(&self, name: &str) -> SyncResult<Option<SyncState>> {
        self.states().by_name(name)
    }

    /// Returns true if a job with this name exists.
    pub fn has_sync_with_name(&self, name: &str) -> SyncResult<bool> {
        self.states().has_name(name)
    }

    /// Deletes a job record. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the job is active.
    pub fn delete_sync(&self, key: impl Into<SyncKey>) -> SyncResult<bool> {
        let Some(sync) = self.states().get(&key.into())? else {
            return Ok(false);
        };
        if self.shared.is_active(sync.id()) {
            return Err(SyncError::AlreadyRunning { id: sync.id() });
        }
        self.states().delete_by_id(sync.id())
    }

    /// Deletes a job record by name. Returns true if it existed.
    pub fn delete_sync_by_name(&self, name: &str) -> SyncResult<bool> {
        self.delete_sync(name)
    }

    // -- running --

    /// Creates and runs a pull job.
    pub fn pull<F>(
        &self,
        target: Arc<dyn PullTarget>,
        options: SyncOptions,
        collection_name: &str,
        name: Option<&str>,
        callback: F,
    ) -> SyncResult<SyncState>
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let sync = self.create_pull(target.as_ref(), options, collection_name, name)?;
        self.launch(sync, ResolvedTarget::Pull(target), Arc::new(callback))
    }

    /// Creates and runs a push job.
    pub fn push<F>(
        &self,
        target: Arc<dyn PushTarget>,
        options: SyncOptions,
        collection_name: &str,
        name: Option<&str>,
        callback: F,
    ) -> SyncResult<SyncState>
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let sync = self.create_push(target.as_ref(), options, collection_name, name)?;
        self.launch(sync, ResolvedTarget::Push(target), Arc::new(callback))
    }

    /// Runs an existing job, rebuilding its target from the descriptor.
    ///
    /// Returns the job as of submission (RUNNING, progress 0).
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the job is active and `ManagerStopped` if
    /// the manager is not accepting syncs.
    pub fn run<F>(&self, sync: SyncState, callback: F) -> SyncResult<SyncState>
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.run_with(sync, Arc::new(callback))
    }

    fn run_with(&self, sync: SyncState, callback: SyncCallback) -> SyncResult<SyncState> {
        self.shared.ensure_can_run(sync.id())?;
        let target = self.resolve(&sync)?;
        self.launch(sync, target, callback)
    }

    fn resolve(&self, sync: &SyncState) -> SyncResult<ResolvedTarget> {
        Ok(match sync.sync_type() {
            SyncType::Pull => ResolvedTarget::Pull(self.targets.pull_target(sync.target())?),
            SyncType::Push => ResolvedTarget::Push(self.targets.push_target(sync.target())?),
        })
    }

    fn launch(
        &self,
        sync: SyncState,
        target: ResolvedTarget,
        callback: SyncCallback,
    ) -> SyncResult<SyncState> {
        let id = sync.id();
        let shared = Arc::clone(&self.shared);
        let (snapshot, generation, job) = match target {
            ResolvedTarget::Pull(target) => {
                let strategy = SyncDownStrategy::new(target);
                Self::queued(SyncTask::new(shared, sync, callback, strategy)?)
            }
            ResolvedTarget::Push(target) if target.as_batch().is_some() => {
                let strategy = BatchSyncUpStrategy::new(target);
                Self::queued(SyncTask::new(shared, sync, callback, strategy)?)
            }
            ResolvedTarget::Push(target) => {
                let strategy = SyncUpStrategy::new(target);
                Self::queued(SyncTask::new(shared, sync, callback, strategy)?)
            }
        };

        if let Err(e) = self.worker.submit(job) {
            self.shared.remove_active(id, generation);
            return Err(e);
        }
        debug!(sync_id = id, sync_type = %snapshot.sync_type(), "sync queued");
        Ok(snapshot)
    }

    fn queued<S>(task: SyncTask<S>) -> (SyncState, u64, Box<dyn Job>)
    where
        S: SyncStrategy + 'static,
    {
        (task.sync().clone(), task.generation(), Box::new(task) as Box<dyn Job>)
    }

    /// Runs an existing job again.
    ///
    /// A pull job that was STOPPED resumes from one millisecond before its
    /// watermark, so records sharing the last timestamp are fetched again.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning`, `ManagerStopped` or `NotFound`.
    pub fn re_run<F>(&self, key: impl Into<SyncKey>, callback: F) -> SyncResult<SyncState>
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.re_run_with(&key.into(), Arc::new(callback))
    }

    fn re_run_with(&self, key: &SyncKey, callback: SyncCallback) -> SyncResult<SyncState> {
        if let SyncKey::Id(id) = key {
            self.shared.ensure_can_run(*id)?;
        }
        let mut sync = self
            .states()
            .get(key)?
            .ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        self.shared.ensure_can_run(sync.id())?;

        // The rewind is persisted by the task's RUNNING update, so a launch
        // that fails leaves the record untouched.
        sync.set_total_size(-1);
        if sync.is_stopped() && sync.sync_type() == SyncType::Pull {
            sync.set_watermark((sync.watermark() - 1).max(-1));
        }

        info!(
            sync_id = sync.id(),
            watermark = sync.watermark(),
            "re-running sync"
        );
        self.run_with(sync, callback)
    }

    /// Removes local records of a pull job that no longer exist remotely.
    ///
    /// The callback receives the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning`, `ManagerStopped`, `NotFound` or
    /// `WrongType` for push jobs.
    pub fn clean_ghosts<F>(&self, key: impl Into<SyncKey>, callback: F) -> SyncResult<()>
    where
        F: FnOnce(SyncResult<usize>) + Send + 'static,
    {
        let key = key.into();
        if let SyncKey::Id(id) = key {
            self.shared.ensure_can_run(id)?;
        }
        let sync = self
            .states()
            .get(&key)?
            .ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        self.shared.ensure_can_run(sync.id())?;
        if sync.sync_type() != SyncType::Pull {
            return Err(SyncError::WrongType {
                id: sync.id(),
                expected: SyncType::Pull,
                actual: sync.sync_type(),
            });
        }

        let target = self.targets.pull_target(sync.target())?;
        let id = sync.id();
        let callback: GhostCallback = Box::new(callback);
        let task = CleanGhostsTask::new(Arc::clone(&self.shared), sync, target, callback)?;
        let generation = task.generation();
        if let Err(e) = self.worker.submit(Box::new(task)) {
            self.shared.remove_active(id, generation);
            return Err(e);
        }
        debug!(sync_id = id, "ghost cleanup queued");
        Ok(())
    }

    // -- control --

    /// Stops accepting jobs.
    ///
    /// Active jobs end STOPPED at their next checkpoint; the manager
    /// becomes STOPPED once the last one has finished.
    pub fn stop(&self) -> ManagerState {
        let state = self.shared.request_stop();
        info!(state = %state, "sync manager stop requested");
        state
    }

    /// Accepts jobs again after a stop.
    ///
    /// With `resume_stopped`, every persisted STOPPED job is re-run and the
    /// resumed jobs are returned. Does nothing when already accepting.
    pub fn restart<F>(&self, resume_stopped: bool, callback: F) -> SyncResult<Vec<SyncState>>
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        if !self.shared.resume() {
            debug!("restart ignored, sync manager is accepting syncs");
            return Ok(Vec::new());
        }
        info!(resume_stopped, "sync manager restarted");
        if !resume_stopped {
            return Ok(Vec::new());
        }

        let callback: SyncCallback = Arc::new(callback);
        let mut resumed = Vec::new();
        for sync in self.states().with_status(SyncStatus::Stopped)? {
            match self.re_run_with(&SyncKey::Id(sync.id()), Arc::clone(&callback)) {
                Ok(sync) => resumed.push(sync),
                Err(SyncError::AlreadyRunning { id }) => {
                    warn!(sync_id = id, "stopped sync still active, not resumed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resumed)
    }

    /// Forgets every active job and stops accepting new ones.
    ///
    /// Used on logout. Tasks queued before the reset still execute but end
    /// at their first checkpoint, even after a restart. A queued task whose
    /// job has been submitted again since is dropped.
    pub fn reset(&self) {
        self.shared.reset();
        info!("sync manager reset");
    }

    /// Blocks until every task queued so far has executed.
    ///
    /// Must not be called from a sync callback.
    pub fn wait_idle(&self) -> SyncResult<()> {
        self.worker.wait_idle()
    }
}

impl fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncManager")
            .field("state", &self.state())
            .field("active", &self.active_syncs())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
