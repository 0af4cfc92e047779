//! Memory budget and epoch-based preload cancellation
//!
//! **Why**: Every animated image caps its resident frames at a byte budget.
//! In auto mode the cap is derived from system memory, so it has to be
//! recomputed when the process returns to the foreground or after a memory
//! warning. A per-image epoch cancels stale preload passes without locking.
//!
//! **Used by**: AnimatedImage (budget under its mutex, epoch shared with jobs)
//!
//! # Auto budget
//!
//! `min(total_fraction * total_memory, free_fraction * free_memory)`, with
//! defaults 0.2 and 0.6. The free term keeps the cache small when the machine
//! is already under pressure.

use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::System;

/// Total and free physical memory read at the same instant (bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total: u64,
    pub free: u64,
}

/// Source of total/free physical memory (bytes)
pub trait MemoryProbe: Send + Sync {
    fn total_memory(&self) -> u64;
    fn free_memory(&self) -> u64;

    /// Both figures from one reading
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            total: self.total_memory(),
            free: self.free_memory(),
        }
    }
}

/// Live system memory via `sysinfo`
///
/// `available_memory` is used as "free": it counts reclaimable caches, which
/// matches what a new allocation can actually get.
pub struct SystemMemory {
    sys: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }

    fn refreshed<R>(&self, f: impl FnOnce(&System) -> R) -> R {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        f(&sys)
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemory").finish_non_exhaustive()
    }
}

impl MemoryProbe for SystemMemory {
    fn total_memory(&self) -> u64 {
        self.refreshed(|sys| sys.total_memory())
    }

    fn free_memory(&self) -> u64 {
        self.refreshed(|sys| sys.available_memory())
    }

    fn snapshot(&self) -> MemorySnapshot {
        self.refreshed(|sys| MemorySnapshot {
            total: sys.total_memory(),
            free: sys.available_memory(),
        })
    }
}

/// Fixed memory figures (tests, reproducible CLI runs)
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory {
    pub total: u64,
    pub free: u64,
}

impl FixedMemory {
    pub fn new(total: u64, free: u64) -> Self {
        Self { total, free }
    }
}

impl MemoryProbe for FixedMemory {
    fn total_memory(&self) -> u64 {
        self.total
    }

    fn free_memory(&self) -> u64 {
        self.free
    }
}

/// Fractions used by the auto budget formula
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetPolicy {
    /// Share of total physical memory (default 0.2)
    pub total_fraction: f64,
    /// Share of currently free memory (default 0.6)
    pub free_fraction: f64,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            total_fraction: 0.2,
            free_fraction: 0.6,
        }
    }
}

impl BudgetPolicy {
    /// Auto budget in bytes for the given memory probe
    ///
    /// Reads the probe once. Call it without holding the cache lock.
    pub fn compute(&self, memory: &dyn MemoryProbe) -> i64 {
        let MemorySnapshot { total, free } = memory.snapshot();
        let by_total = total as f64 * self.total_fraction;
        let by_free = free as f64 * self.free_fraction;
        let bytes = by_total.min(by_free).max(0.0);
        if bytes >= i64::MAX as f64 {
            i64::MAX
        } else {
            bytes as i64
        }
    }
}

/// Byte cap for resident frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    max_cache_bytes: i64,
    auto_update: bool,
}

impl Default for CacheBudget {
    /// Unbounded until the first auto refresh
    fn default() -> Self {
        Self {
            max_cache_bytes: i64::MAX,
            auto_update: true,
        }
    }
}

impl CacheBudget {
    pub fn max_cache_bytes(&self) -> i64 {
        self.max_cache_bytes
    }

    pub fn is_auto(&self) -> bool {
        self.auto_update
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_cache_bytes == i64::MAX
    }

    /// Apply a user request: `>= 0` pins the cap, negative switches to auto
    ///
    /// Returns true if the caller has to recompute the auto value.
    pub fn request(&mut self, bytes: i64) -> bool {
        if bytes < 0 {
            self.auto_update = true;
            true
        } else {
            self.auto_update = false;
            self.max_cache_bytes = bytes;
            info!("Cache budget pinned to {} KB", bytes / 1024);
            false
        }
    }

    /// Unbounded, auto off (used by preload-all)
    pub fn unbounded(&mut self) {
        self.auto_update = false;
        self.max_cache_bytes = i64::MAX;
    }

    /// Store an auto value computed by [`BudgetPolicy::compute`], if auto mode is on
    ///
    /// Returns the new cap when it was applied.
    pub fn refresh(&mut self, bytes: i64) -> Option<i64> {
        if !self.auto_update {
            return None;
        }
        if bytes != self.max_cache_bytes {
            debug!(
                "Auto budget: {} MB -> {} MB",
                mb(self.max_cache_bytes),
                mb(bytes)
            );
        }
        self.max_cache_bytes = bytes;
        Some(bytes)
    }

    /// True if `bytes` fits under the cap
    pub fn admits(&self, bytes: i64) -> bool {
        bytes <= self.max_cache_bytes
    }
}

fn mb(bytes: i64) -> i64 {
    if bytes == i64::MAX {
        -1
    } else {
        bytes / 1024 / 1024
    }
}

/// Per-image generation counter
///
/// Every bump invalidates work captured under an older value. Cloning shares
/// the counter.
#[derive(Debug, Clone, Default)]
pub struct Epoch {
    current: Arc<AtomicU64>,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new value
    pub fn increment(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// True if nothing bumped the counter since `captured` was read
    pub fn is_current(&self, captured: u64) -> bool {
        self.current() == captured
    }

    /// Shared counter (for `WorkerPool::execute_with_epoch`)
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current)
    }
}
