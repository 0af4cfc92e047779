//! Shared thread pool for background cache work (preload passes, async clears)
//!
//! Uses work-stealing deques:
//! - External jobs go to a global injector that every worker polls first
//! - Idle workers steal from each other
//!
//! Cancellation is not the pool's job: callers wrap jobs with an epoch check
//! through [`WorkerPool::execute_with_epoch`].

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::traits::{Job, WorkerPool};

/// Worker pool with work-stealing.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(2);
/// workers.execute(Box::new(move || {
///     image.clear();
/// }));
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Create a pool with `num_threads` workers (at least one).
    ///
    /// Recommended: [`Workers::default_thread_count`].
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(Worker::stealer).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("animcache-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    loop {
                        if let Some(job) = next_job(&local, &injector, &stealers) {
                            job();
                            continue;
                        }
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    trace!("Worker {} stopped", worker_id);
                })
                .expect("Failed to spawn worker thread");

            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);

        Self {
            injector,
            handles,
            shutdown,
        }
    }

    /// 3/4 of the logical CPUs, at least one
    pub fn default_thread_count() -> usize {
        (num_cpus::get() * 3 / 4).max(1)
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Jobs waiting in the global queue
    pub fn pending(&self) -> usize {
        self.injector.len()
    }
}

/// Own queue, then the injector, then the other workers
fn next_job(local: &Worker<Job>, injector: &Injector<Job>, stealers: &[Stealer<Job>]) -> Option<Job> {
    local.pop().or_else(|| {
        std::iter::repeat_with(|| {
            injector
                .steal_batch_and_pop(local)
                .or_else(|| stealers.iter().map(Stealer::steal).collect())
        })
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    })
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Jobs still queued run before the workers exit; give them 500ms total
        let deadline = Instant::now() + Duration::from_millis(500);

        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

impl WorkerPool for Workers {
    fn execute(&self, job: Job) {
        self.injector.push(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::sync::mpsc;

    #[test]
    fn test_executes_jobs() {
        let workers = Workers::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            workers.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }));
        }
        for _ in 0..10 {
            rx.recv_timeout(Duration::from_secs(5)).expect("job ran");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_stale_epoch_skips_job() {
        let workers = Workers::new(1);
        let epoch = Arc::new(AtomicU64::new(0));
        let ran = Arc::new(AtomicBool::new(false));

        // Block the only worker so the epoch bump lands before the job is picked up
        let (release_tx, release_rx) = mpsc::channel::<()>();
        workers.execute(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }));

        let flag = Arc::clone(&ran);
        workers.execute_with_epoch(
            Arc::clone(&epoch),
            0,
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        epoch.fetch_add(1, Ordering::SeqCst);
        release_tx.send(()).expect("release");

        // A marker job after the stale one proves the queue drained
        let (done_tx, done_rx) = mpsc::channel();
        workers.execute(Box::new(move || {
            let _ = done_tx.send(());
        }));
        done_rx.recv_timeout(Duration::from_secs(5)).expect("marker ran");
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_zero_threads_clamped() {
        let workers = Workers::new(0);
        assert_eq!(workers.thread_count(), 1);
        assert!(Workers::default_thread_count() >= 1);
    }
}
