//! # tidesync Engine
//!
//! Offline-first sync jobs between a local document store and a remote
//! record service.
//!
//! This crate provides:
//! - Persisted sync jobs ([`SyncState`]) with conflict policy ([`SyncOptions`])
//! - Pull jobs: paged download with a modification-time watermark
//! - Push jobs: per-record or batched upload of local changes
//! - Ghost cleanup: removal of local records deleted on the server
//! - A [`SyncManager`] scheduling jobs on one worker with cooperative stop
//!
//! ## Architecture
//!
//! Remote services are reached through target adapters ([`PullTarget`],
//! [`PushTarget`], [`BatchPushTarget`]). The engine never talks to the
//! network itself; it decides what to fetch, what to push, and how to
//! reconcile the local collection with each outcome.
//!
//! ## Key Invariants
//!
//! - A job id is active at most once at a time
//! - A job leaves the active registry as soon as it is no longer RUNNING
//! - Progress never decreases within a run and reaches 100 only on DONE
//! - Locally modified records are never overwritten under `LEAVE_IF_CHANGED`
//! - Per-record push failures are recorded on the record, not on the job

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod options;
pub mod record;
mod registry;
mod state;
mod target;
mod task;
mod worker;

pub use config::{ManagerConfig, DEFAULT_SYNCS_COLLECTION, DEFAULT_WORKER_NAME};
pub use error::{SyncError, SyncResult};
pub use manager::{ManagerState, SyncManager};
pub use options::{MergeMode, SyncOptions};
pub use registry::ManagerRegistry;
pub use state::{SyncKey, SyncState, SyncStateStore, SyncStatus, SyncType};
pub use target::{
    BatchPushTarget, Page, PullTarget, PushOutcome, PushTarget, TargetFactory, TargetRegistry,
    DEFAULT_ID_FIELD, DEFAULT_MODIFICATION_FIELD,
};
pub use task::{GhostCallback, SyncCallback};
