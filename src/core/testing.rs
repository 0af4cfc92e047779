//! Deterministic collaborators for cache tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::animated::CacheOptions;
use super::cache_man::{BudgetPolicy, FixedMemory, MemoryProbe};
use crate::entities::traits::{Job, WorkerPool};

/// 1 GiB total and free: auto budget = 0.2 GiB
pub(crate) const TEST_MEMORY: u64 = 1 << 30;

/// Pool that only queues; tests decide when jobs run
#[derive(Default)]
pub(crate) struct ManualPool {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualPool {
    pub(crate) fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Run the oldest job. Returns false if the queue was empty.
    pub(crate) fn run_one(&self) -> bool {
        let job = self.jobs.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs (including ones they enqueue) until the queue is empty
    pub(crate) fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl WorkerPool for ManualPool {
    fn execute(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }
}

pub(crate) fn options(pool: &Arc<ManualPool>) -> CacheOptions {
    let workers: Arc<dyn WorkerPool> = pool.clone();
    CacheOptions {
        workers,
        memory: Arc::new(FixedMemory::new(TEST_MEMORY, TEST_MEMORY)),
        policy: BudgetPolicy::default(),
        refresh_delay: Duration::from_millis(20),
    }
}

/// Memory figures a test can change between refreshes
pub(crate) struct AdjustableMemory {
    total: AtomicU64,
    free: AtomicU64,
}

impl AdjustableMemory {
    pub(crate) fn new(total: u64, free: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            free: AtomicU64::new(free),
        }
    }

    pub(crate) fn set(&self, total: u64, free: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.free.store(free, Ordering::SeqCst);
    }
}

impl MemoryProbe for AdjustableMemory {
    fn total_memory(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    fn free_memory(&self) -> u64 {
        self.free.load(Ordering::SeqCst)
    }
}
