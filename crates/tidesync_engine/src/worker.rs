//! Single-threaded task queue.

use crate::error::{SyncError, SyncResult};
use crate::task::Job;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Executes jobs one at a time, in submission order, on a dedicated thread.
pub(crate) struct Worker {
    sender: Mutex<Option<Sender<Box<dyn Job>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Signals the waiting caller once every earlier job has run.
struct Barrier(Sender<()>);

impl Job for Barrier {
    fn execute(self: Box<Self>) {
        let _ = self.0.send(());
    }
}

impl Worker {
    /// Starts the worker thread.
    pub(crate) fn spawn(name: &str) -> SyncResult<Self> {
        let (sender, receiver) = mpsc::channel::<Box<dyn Job>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(|| job.execute())).is_err() {
                        error!("sync task panicked");
                    }
                }
                debug!("sync worker exiting");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues a job behind every job already submitted.
    pub(crate) fn submit(&self, job: Box<dyn Job>) -> SyncResult<()> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).map_err(|_| SyncError::QueueClosed),
            None => Err(SyncError::QueueClosed),
        }
    }

    /// Blocks until every job submitted so far has executed.
    ///
    /// Must not be called from the worker thread.
    pub(crate) fn wait_idle(&self) -> SyncResult<()> {
        let (done, wait) = mpsc::channel();
        self.submit(Box::new(Barrier(done)))?;
        wait.recv().map_err(|_| SyncError::QueueClosed)
    }

    /// Closes the queue and joins the thread once it has drained.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("sync worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Push(Arc<Mutex<Vec<u32>>>, u32);

    impl Job for Push {
        fn execute(self: Box<Self>) {
            self.0.lock().push(self.1);
        }
    }

    struct Panics;

    impl Job for Panics {
        fn execute(self: Box<Self>) {
            panic!("boom");
        }
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let worker = Worker::spawn("test-worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            worker.submit(Box::new(Push(Arc::clone(&seen), i))).unwrap();
        }
        worker.wait_idle().unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let worker = Worker::spawn("test-worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        worker.submit(Box::new(Panics)).unwrap();
        worker.submit(Box::new(Push(Arc::clone(&seen), 7))).unwrap();
        worker.wait_idle().unwrap();
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let worker = Worker::spawn("test-worker").unwrap();
        worker.shutdown();
        let result = worker.submit(Box::new(Panics));
        assert!(matches!(result, Err(SyncError::QueueClosed)));
    }

    #[test]
    fn shutdown_drains_queue() {
        let worker = Worker::spawn("test-worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            worker.submit(Box::new(Push(Arc::clone(&seen), i))).unwrap();
        }
        drop(worker);
        assert_eq!(seen.lock().len(), 3);
    }
}
