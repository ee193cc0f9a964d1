//! # tidesync Testkit
//!
//! Test utilities for tidesync.
//!
//! This crate provides:
//! - Managers over temporary memory or file stores
//! - Scripted pull, push and batched push targets
//! - Recorders for sync and ghost-cleanup callbacks
//! - A gate for holding a job mid-run
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidesync_testkit::prelude::*;
//!
//! #[test]
//! fn pulls_everything() {
//!     let env = TestManager::memory();
//!     let target = ScriptedPullTarget::new(vec![vec![remote_record("001", 10)]]);
//!     let recorder = CallbackRecorder::new();
//!     env.pull(target.shared(), SyncOptions::overwrite(), "accounts", None, recorder.callback())
//!         .unwrap();
//!     env.wait_idle().unwrap();
//!     assert!(recorder.last().unwrap().is_done());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod gate;
pub mod generators;
pub mod pull;
pub mod push;
pub mod recorder;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::gate::*;
    pub use crate::generators::*;
    pub use crate::pull::*;
    pub use crate::push::*;
    pub use crate::recorder::*;
    pub use tidesync_engine::{
        record, BatchPushTarget, ManagerState, MergeMode, PullTarget, PushTarget, SyncError,
        SyncKey, SyncManager, SyncOptions, SyncState, SyncStatus, SyncType, TargetRegistry,
    };
    pub use tidesync_store::{LocalStore, Query};
}

pub use fixtures::*;
pub use gate::*;
pub use generators::*;
pub use pull::*;
pub use push::*;
pub use recorder::*;
