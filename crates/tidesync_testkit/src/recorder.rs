//! Callback recorders.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tidesync_engine::{SyncResult, SyncState, SyncStatus};

/// Records every state a sync callback receives.
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    inner: Arc<(Mutex<Vec<SyncState>>, Condvar)>,
}

impl CallbackRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback appending to this recorder.
    pub fn callback(&self) -> impl Fn(&SyncState) + Send + Sync + 'static {
        let inner = Arc::clone(&self.inner);
        move |sync: &SyncState| {
            let (states, changed) = &*inner;
            states.lock().push(sync.clone());
            changed.notify_all();
        }
    }

    /// Every recorded state, in order.
    pub fn states(&self) -> Vec<SyncState> {
        self.inner.0.lock().clone()
    }

    /// The most recent state.
    pub fn last(&self) -> Option<SyncState> {
        self.inner.0.lock().last().cloned()
    }

    /// (status, progress) of every recorded state.
    pub fn updates(&self) -> Vec<(SyncStatus, u8)> {
        self.inner
            .0
            .lock()
            .iter()
            .map(|s| (s.status(), s.progress()))
            .collect()
    }

    /// Progress of every recorded state.
    pub fn progress(&self) -> Vec<u8> {
        self.updates().into_iter().map(|(_, p)| p).collect()
    }

    /// Number of recorded states.
    pub fn len(&self) -> usize {
        self.inner.0.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until a terminal state has been recorded.
    pub fn wait_for_terminal(&self, timeout: Duration) -> Option<SyncState> {
        let (states, changed) = &*self.inner;
        let mut states = states.lock();
        let found = |states: &Vec<SyncState>| {
            states.iter().rev().find(|s| s.is_terminal()).cloned()
        };
        if let Some(done) = found(&states) {
            return Some(done);
        }
        let _ = changed.wait_while_for(&mut states, |s| found(s).is_none(), timeout);
        found(&states)
    }
}

/// Captures the outcome of a ghost cleanup.
#[derive(Clone, Default)]
pub struct GhostRecorder {
    inner: Arc<(Mutex<Option<SyncResult<usize>>>, Condvar)>,
}

impl GhostRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback storing the outcome in this recorder.
    pub fn callback(&self) -> impl FnOnce(SyncResult<usize>) + Send + 'static {
        let inner = Arc::clone(&self.inner);
        move |result| {
            let (slot, done) = &*inner;
            *slot.lock() = Some(result);
            done.notify_all();
        }
    }

    /// Waits for the outcome and takes it.
    pub fn wait(&self, timeout: Duration) -> Option<SyncResult<usize>> {
        let (slot, done) = &*self.inner;
        let mut slot = slot.lock();
        let _ = done.wait_while_for(&mut slot, |s| s.is_none(), timeout);
        slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ghost_recorder_roundtrip() {
        let recorder = GhostRecorder::new();
        (recorder.callback())(Ok(3));
        let cleaned = recorder.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(cleaned.unwrap(), 3);
        assert!(recorder.wait(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_empty_recorder_times_out() {
        let recorder = CallbackRecorder::new();
        assert!(recorder.is_empty());
        let terminal = recorder.wait_for_terminal(Duration::from_millis(5));
        assert!(terminal.is_none());
    }
}
