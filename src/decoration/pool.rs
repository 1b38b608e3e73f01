//! Single-worker background pool.

use crossbeam_channel::{unbounded, Sender};
use std::io;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One named worker thread draining a job queue in submission order.
///
/// Dropping the pool closes the queue, lets the worker finish what is
/// already queued and joins it.
pub struct WorkerPool {
    name: String,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the worker thread.
    pub fn new(name: &str) -> io::Result<Self> {
        let (jobs, queue) = unbounded::<Job>();
        let thread_name = name.to_string();

        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::trace!("{} worker started", thread_name);
                for job in queue.iter() {
                    job();
                }
                tracing::trace!("{} worker stopped", thread_name);
            })?;

        Ok(Self {
            name: name.to_string(),
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    /// Queue a job. Returns false if the worker is gone.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match &self.jobs {
            Some(jobs) => jobs.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Name of the worker thread.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("{} worker panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_order_and_drain_on_drop() {
        let pool = WorkerPool::new("test-pool").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = seen.clone();
            assert!(pool.submit(move || seen.lock().push(i)));
        }
        drop(pool);

        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_runs_on_named_thread() {
        let pool = WorkerPool::new("icon-resolver").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("icon-resolver"));
        assert_eq!(pool.name(), "icon-resolver");
    }
}
