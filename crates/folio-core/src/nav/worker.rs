//! One background thread running listing and diff jobs in FIFO order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread with a FIFO job queue.
///
/// Dropping the worker lets already-queued jobs finish, then joins the thread.
#[derive(Debug)]
pub struct IoWorker {
    tx: Mutex<Option<UnboundedSender<Job>>>,
    pending: Arc<AtomicUsize>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IoWorker {
    pub fn new() -> CoreResult<Self> {
        let (tx, mut rx) = unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pending);
        let handle = std::thread::Builder::new()
            .name("folio-io".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                    counter.fetch_sub(1, Ordering::SeqCst);
                }
                debug!("io worker stopped");
            })
            .map_err(CoreError::Io)?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            pending,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues `job` behind every job submitted before it.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let guard = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = guard.as_ref() else {
            warn!("io worker is shut down, dropping job");
            return;
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(Box::new(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("io worker thread is gone, dropping job");
        }
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs, drains the queue and joins the thread.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("io worker panicked");
            }
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_run_in_submission_order() {
        let worker = IoWorker::new().unwrap();
        let (tx, mut rx) = unbounded_channel();
        for i in 0..20 {
            let tx = tx.clone();
            worker.submit(move || tx.send(i).unwrap());
        }
        drop(tx);
        let mut order = Vec::new();
        while let Some(i) = rx.blocking_recv() {
            order.push(i);
        }
        assert_eq!(order, (0..20).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn jobs_submitted_from_a_runtime_report_back() {
        let worker = IoWorker::new().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        worker.submit(move || {
            let _ = tx.send(std::thread::current().name().map(str::to_string));
        });
        assert_eq!(rx.await.unwrap().as_deref(), Some("folio-io"));
    }

    #[test]
    fn drop_drains_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let worker = IoWorker::new().unwrap();
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                worker.submit(move || {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn submit_after_shutdown_is_ignored() {
        let worker = IoWorker::new().unwrap();
        worker.shutdown();
        worker.submit(|| panic!("must not run"));
        assert_eq!(worker.pending(), 0);
    }
}
