//! Error types for the sync engine.

use crate::manager::ManagerState;
use crate::state::SyncType;
use thiserror::Error;
use tidesync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The manager stopped accepting syncs while a job was running.
    ///
    /// Returned by the cancellation checkpoint; the job ends STOPPED.
    #[error("sync manager has state: {state}")]
    Stopped {
        /// Manager state observed at the checkpoint.
        state: ManagerState,
    },

    /// The user's credentials were revoked mid-run.
    ///
    /// The job record is left as is; the logout flow owns cleanup.
    #[error("credentials revoked: {0}")]
    AuthRevoked(String),

    /// A job with the same name already exists.
    #[error("there is already a sync with name: {0}")]
    DuplicateName(String),

    /// The job is already registered as active.
    #[error("cannot run sync {id}: it is already running")]
    AlreadyRunning {
        /// Job id.
        id: i64,
    },

    /// A job was submitted while the manager is not accepting syncs.
    #[error("sync manager is not accepting syncs (state: {state})")]
    ManagerStopped {
        /// Current manager state.
        state: ManagerState,
    },

    /// No job matches the given id or name.
    #[error("no sync found: {0}")]
    NotFound(String),

    /// The job has the wrong type for the requested operation.
    #[error("sync {id} has wrong type: expected {expected}, found {actual}")]
    WrongType {
        /// Job id.
        id: i64,
        /// Type the operation requires.
        expected: SyncType,
        /// Type of the job.
        actual: SyncType,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A job record or target descriptor could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Target adapter failure.
    #[error("target error: {0}")]
    Target(String),

    /// No target builder is registered for a descriptor.
    #[error("no target registered for descriptor: {0}")]
    UnknownTarget(String),

    /// Network or transport error raised by a target adapter.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The worker queue no longer accepts tasks.
    #[error("sync queue is closed")]
    QueueClosed,

    /// I/O error (worker thread creation).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Creates a target error.
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target(message.into())
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true for the cooperative stop signal.
    pub fn is_stop_signal(&self) -> bool {
        matches!(self, SyncError::Stopped { .. })
    }

    /// Returns true if credentials were revoked.
    pub fn is_auth_revoked(&self) -> bool {
        matches!(self, SyncError::AuthRevoked(_))
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
