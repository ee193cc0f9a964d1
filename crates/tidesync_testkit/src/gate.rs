//! Blocking gate for pausing a job on the worker thread.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

/// A one-shot gate: [`Gate::wait`] blocks until [`Gate::open`] is called.
///
/// Used inside target hooks to hold a job in the middle of a run while the
/// test inspects or stops the manager.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl Gate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the gate opens.
    pub fn wait(&self) {
        let (state, changed) = &*self.inner;
        let mut state = state.lock();
        state.waiting += 1;
        changed.notify_all();
        changed.wait_while(&mut state, |s| !s.open);
        state.waiting -= 1;
    }

    /// Waits until some thread is blocked on the gate.
    pub fn wait_for_waiter(&self, timeout: Duration) -> bool {
        let (state, changed) = &*self.inner;
        let mut state = state.lock();
        let _ = changed.wait_while_for(&mut state, |s| s.waiting == 0, timeout);
        state.waiting > 0
    }

    /// Opens the gate, releasing every waiter.
    pub fn open(&self) {
        let (state, changed) = &*self.inner;
        state.lock().open = true;
        changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_gate_releases_waiter() {
        let gate = Gate::new();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        assert!(gate.wait_for_waiter(Duration::from_secs(5)));
        gate.open();
        waiter.join().unwrap();
    }

    #[test]
    fn test_open_gate_does_not_block() {
        let gate = Gate::new();
        gate.open();
        gate.wait();
        assert!(!gate.wait_for_waiter(Duration::from_millis(1)));
    }
}
