//! Background preload pass: fills the cache up to the budget, or trims it
//!
//! At most one pass per image is in flight. A pass is a single worker job
//! that captured the image's generation when it was scheduled; every step
//! re-checks it, and every mutation re-checks it under the lock.
//!
//! # Walk order
//!
//! - Fill: `from, from+1, ...` wrapping around. The first frame that would
//!   push the cache over budget ends the pass.
//! - Evict: starts two frames before `from` and walks backwards, so the frame
//!   just shown and the one about to be shown go last. Stops once the cache is
//!   within budget, which may free up to one frame more than strictly needed.

use log::{debug, trace};
use std::sync::Arc;

use super::animated::{PreloadState, Shared};
use super::cache_man::CacheBudget;
use crate::entities::frame::Image;
use crate::entities::store::FrameStore;

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PassOutcome {
    Completed,
    Cancelled,
}

/// Eviction walk: `from-2, from-3, ...` wrapped over `n`
pub(super) fn eviction_order(from: usize, n: usize) -> impl Iterator<Item = usize> {
    (0..n).map(move |i| (from + n * 2 - i - 2) % n)
}

/// Fill walk: `from, from+1, ...` wrapped over `n`
pub(super) fn fill_order(from: usize, n: usize) -> impl Iterator<Item = usize> {
    (0..n).map(move |i| (from + i) % n)
}

impl Shared {
    /// Schedule a pass from `from`.
    ///
    /// No-op if `from` is out of range, a pass is already running, or every
    /// frame is cached and the cache is within budget.
    pub(super) fn start_preload(self: &Arc<Self>, from: usize) -> bool {
        if from >= self.frame_count {
            return false;
        }

        let generation = {
            let mut state = self.lock();
            if let PreloadState::Running { generation } = state.preload {
                trace!("Preload from {} skipped: pass {} still running", from, generation);
                return false;
            }
            let within_budget = state.budget.admits(state.store.current_cache_bytes());
            if state.store.is_fully_cached() && within_budget {
                return false;
            }
            let generation = self.epoch.current();
            state.preload = PreloadState::Running { generation };
            generation
        };

        debug!("Preload pass {} scheduled from frame {}", generation, from);
        let weak = Arc::downgrade(self);
        self.workers.execute_with_epoch(
            self.epoch.epoch_ref(),
            generation,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.run_pass(from, generation);
                }
            }),
        );
        true
    }

    fn run_pass(&self, from: usize, generation: u64) -> PassOutcome {
        let over_budget = {
            let state = self.lock();
            if !self.epoch.is_current(generation) {
                return PassOutcome::Cancelled;
            }
            !state.budget.admits(state.store.current_cache_bytes())
        };

        let outcome = if over_budget {
            self.evict_pass(from, generation)
        } else {
            self.fill_pass(from, generation)
        };

        if outcome == PassOutcome::Completed {
            let mut state = self.lock();
            if self.epoch.is_current(generation)
                && state.preload == (PreloadState::Running { generation })
            {
                state.preload = PreloadState::Idle;
            }
        }
        debug!("Preload pass {} {:?}", generation, outcome);
        outcome
    }

    fn evict_pass(&self, from: usize, generation: u64) -> PassOutcome {
        let mut evicted = 0usize;
        for index in eviction_order(from, self.frame_count) {
            let mut state = self.lock();
            if !self.epoch.is_current(generation) {
                return PassOutcome::Cancelled;
            }
            if state.store.take(index).is_some() {
                evicted += 1;
                trace!("Evicted frame {}", index);
                if state.budget.admits(state.store.current_cache_bytes()) {
                    break;
                }
            }
        }
        debug!("Eviction freed {} frames", evicted);
        PassOutcome::Completed
    }

    fn fill_pass(&self, from: usize, generation: u64) -> PassOutcome {
        for index in fill_order(from, self.frame_count) {
            if !self.epoch.is_current(generation) {
                return PassOutcome::Cancelled;
            }
            let Some(image) = self.get_frame(index, true) else {
                continue;
            };
            if !self.epoch.is_current(generation) {
                return PassOutcome::Cancelled;
            }

            let mut guard = self.lock();
            if !self.epoch.is_current(generation) {
                return PassOutcome::Cancelled;
            }
            let state = &mut *guard;
            if !admit(&mut state.store, &state.budget, index, image) {
                trace!("Frame {} would exceed budget, fill stops", index);
                break;
            }
        }
        PassOutcome::Completed
    }

    /// Decode and store every frame in order, budget lifted
    ///
    /// Counts as the running pass until it returns, so `start_preload` stays
    /// a no-op meanwhile.
    pub(super) fn preload_all(&self) {
        let generation = {
            let mut state = self.lock();
            let generation = self.epoch.increment();
            state.preload = PreloadState::Running { generation };
            state.budget.unbounded();
            state.store.clear();
            generation
        };

        for index in 0..self.frame_count {
            if !self.epoch.is_current(generation) {
                debug!("Preload-all interrupted at frame {}", index);
                return;
            }
            let Some(image) = self.get_frame(index, true) else {
                continue;
            };
            let mut state = self.lock();
            if !self.epoch.is_current(generation) {
                return;
            }
            state.store.set(index, Some(image));
        }

        let mut state = self.lock();
        if self.epoch.is_current(generation) && state.preload == (PreloadState::Running { generation }) {
            state.preload = PreloadState::Idle;
        }
        debug!("Preload-all finished: {} frames", self.frame_count);
    }
}

/// Store `image` at `index` if the budget allows. Returns false to stop the fill.
///
/// A resident frame with the same edit key is kept as is. Replacing a frame
/// with a different key is charged by the size difference.
fn admit(store: &mut FrameStore, budget: &CacheBudget, index: usize, image: Image) -> bool {
    let current = store.current_cache_bytes();
    let charge = match store.slot(index).and_then(|slot| slot.image()) {
        Some(existing) if existing.edit_key() == image.edit_key() => return true,
        Some(existing) => image.byte_size() - existing.byte_size(),
        None => image.byte_size(),
    };
    if !budget.admits(current.saturating_add(charge)) {
        return false;
    }
    store.set(index, Some(image));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::animated::AnimatedImage;
    use crate::core::testing::{options, ManualPool};
    use crate::entities::editors::Grayscale;
    use crate::entities::synthetic::{DecodeCounter, SyntheticDecoder};
    use std::time::{Duration, Instant};

    const W: u32 = 4;
    const H: u32 = 4;
    const FRAME: i64 = (W * H * 4) as i64;

    fn make(frames: usize) -> (AnimatedImage, Arc<ManualPool>, Arc<DecodeCounter>) {
        let pool = Arc::new(ManualPool::default());
        let decoder = SyntheticDecoder::new(frames, W, H);
        let counter = decoder.counter();
        let image = AnimatedImage::new(Box::new(decoder), options(&pool)).expect("image");
        (image, pool, counter)
    }

    fn assert_accounting(image: &AnimatedImage) {
        let stats = image.stats();
        assert_eq!(stats.cached_frames, image.cached_indices().len());
        assert_eq!(stats.cached_bytes, stats.cached_frames as i64 * FRAME);
    }

    #[test]
    fn test_walk_orders() {
        assert_eq!(fill_order(3, 5).collect::<Vec<_>>(), vec![3, 4, 0, 1, 2]);
        assert_eq!(eviction_order(0, 5).collect::<Vec<_>>(), vec![3, 2, 1, 0, 4]);
        assert_eq!(eviction_order(2, 5).collect::<Vec<_>>(), vec![0, 4, 3, 2, 1]);
        assert_eq!(eviction_order(0, 1).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_fill_unbounded_caches_everything() {
        let (image, pool, _counter) = make(5);
        image.set_budget(i64::MAX);

        assert!(image.start_preload(0));
        assert!(image.is_preloading());
        assert_eq!(pool.run_all(), 1);

        assert_eq!(image.cached_frame_count(), 5);
        assert!(!image.is_preloading());
        assert_accounting(&image);

        // Fully cached and within budget: nothing to do
        assert!(!image.start_preload(0));
    }

    #[test]
    fn test_evict_scenario_keeps_next_frame() {
        let (image, pool, _counter) = make(5);
        image.set_budget(i64::MAX);
        image.start_preload(0);
        pool.run_all();
        assert_eq!(image.cached_frame_count(), 5);

        image.set_budget(FRAME);
        assert!(image.start_preload(0));
        pool.run_all();

        assert!(image.current_bytes() <= image.budget());
        assert_eq!(image.cached_indices(), vec![4]);
        assert!(!image.is_preloading());
        assert_accounting(&image);
    }

    #[test]
    fn test_eviction_order_is_backwards_from_two_before() {
        let (image, pool, _counter) = make(5);
        image.preload_all();

        // Budget of three frames: 3 and 2 go first
        image.set_budget(3 * FRAME);
        image.start_preload(0);
        pool.run_all();
        assert_eq!(image.cached_indices(), vec![0, 1, 4]);

        image.set_budget(FRAME);
        image.start_preload(0);
        pool.run_all();
        assert_eq!(image.cached_indices(), vec![4]);
    }

    #[test]
    fn test_fill_respects_budget() {
        let (image, pool, _counter) = make(6);
        image.set_budget(3 * FRAME);
        image.start_preload(0);
        pool.run_all();

        assert_eq!(image.cached_indices(), vec![0, 1, 2]);
        assert!(image.current_bytes() <= image.budget());
        assert!(!image.is_preloading());
    }

    #[test]
    fn test_fill_wraps_from_start_index() {
        let (image, pool, _counter) = make(6);
        image.clear();
        image.set_budget(3 * FRAME);
        image.start_preload(4);
        pool.run_all();
        assert_eq!(image.cached_indices(), vec![0, 4, 5]);
    }

    #[test]
    fn test_fill_skips_failed_frames() {
        let pool = Arc::new(ManualPool::default());
        let decoder = SyntheticDecoder::new(5, W, H).with_failing([2, 3]);
        let image = AnimatedImage::new(Box::new(decoder), options(&pool)).expect("image");
        image.set_budget(i64::MAX);
        image.start_preload(0);
        pool.run_all();
        assert_eq!(image.cached_indices(), vec![0, 1, 4]);
        assert!(!image.is_preloading());

        // Not fully cached, so a new pass may start (and fail the same frames)
        assert!(image.start_preload(1));
    }

    #[test]
    fn test_single_pass_at_a_time() {
        let (image, pool, _counter) = make(5);
        assert!(image.start_preload(0));
        assert!(!image.start_preload(1));
        assert!(!image.start_preload(9));
        assert_eq!(pool.pending(), 1);
        pool.run_all();
        assert!(!image.is_preloading());
    }

    #[test]
    fn test_cancel_before_run_leaves_cache_untouched() {
        let (image, pool, counter) = make(5);
        image.set_budget(i64::MAX);
        let before = image.stats();

        assert!(image.start_preload(0));
        image.cancel_preload();
        assert!(!image.is_preloading());
        pool.run_all();

        assert_eq!(counter.decodes(), 1);
        assert_eq!(image.cached_indices(), vec![0]);
        assert_eq!(image.current_bytes(), before.cached_bytes);
    }

    #[test]
    fn test_detach_cancels_pending_pass() {
        let (image, pool, counter) = make(5);
        let view = uuid::Uuid::new_v4();
        image.attach_view(view);
        image.set_budget(i64::MAX);

        assert!(image.start_preload(1));
        image.detach_view(view);
        pool.run_all();

        // The pass never decoded; only the async clear touched the cache
        assert_eq!(counter.decodes(), 1);
        assert_eq!(image.cached_frame_count(), 0);
        assert_accounting(&image);
    }

    #[test]
    fn test_clear_during_pass_stops_mutation() {
        let pool = Arc::new(ManualPool::default());
        let decoder = SyntheticDecoder::new(5, W, H);
        let image = Arc::new(AnimatedImage::new(Box::new(decoder), options(&pool)).expect("image"));
        image.set_budget(i64::MAX);
        image.start_preload(0);

        // Run the pass on another thread while the main thread clears
        let runner = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.run_all())
        };
        image.clear();
        runner.join().expect("runner");

        // Whatever the pass stored before the clear is gone, nothing after it
        assert_eq!(image.cached_frame_count(), 0);
        assert!(!image.is_preloading());
        assert_accounting(&image);
    }

    #[test]
    fn test_preload_all_blocks_background_pass() {
        let pool = Arc::new(ManualPool::default());
        let decoder = SyntheticDecoder::new(5, W, H).with_latency(Duration::from_millis(20));
        let image = Arc::new(AnimatedImage::new(Box::new(decoder), options(&pool)).expect("image"));

        let loader = {
            let image = Arc::clone(&image);
            std::thread::spawn(move || image.preload_all())
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !image.is_preloading() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(image.is_preloading());
        assert!(!image.start_preload(0));
        assert_eq!(pool.pending(), 0);

        loader.join().expect("loader");
        assert!(!image.is_preloading());
        assert_eq!(image.cached_frame_count(), 5);
        assert_accounting(&image);
    }

    #[test]
    fn test_cancel_interrupts_preload_all() {
        let pool = Arc::new(ManualPool::default());
        let decoder = SyntheticDecoder::new(50, W, H).with_latency(Duration::from_millis(5));
        let image = Arc::new(AnimatedImage::new(Box::new(decoder), options(&pool)).expect("image"));

        let loader = {
            let image = Arc::clone(&image);
            std::thread::spawn(move || image.preload_all())
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while image.cached_frame_count() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        image.cancel_preload();
        loader.join().expect("loader");

        assert!(!image.is_preloading());
        assert!(image.cached_frame_count() < 50);
        assert_accounting(&image);
    }

    #[test]
    fn test_fill_replaces_raw_frames_after_editor_change() {
        let (image, pool, counter) = make(3);
        image.set_budget(i64::MAX);
        image.set_editor(Some(Arc::new(Grayscale::default())));

        // Frame 0 is edited from its cached raw pixels, 1 and 2 are decoded
        image.start_preload(0);
        pool.run_all();
        assert_eq!(image.cached_frame_count(), 3);
        assert_eq!(counter.decodes(), 3);
        assert_eq!(counter.raw_decodes(), 2);
        for index in 0..3 {
            let frame = image.get_frame(index, false).expect("cached");
            assert_eq!(frame.edit_key().map(|k| k.as_str()), Some("grayscale"));
        }
        assert_accounting(&image);

        // Fully cached and within budget: nothing to do
        assert!(!image.start_preload(0));
    }

    #[test]
    fn test_admit_charges_replacement_delta() {
        let mut store = FrameStore::new(
            Image::filled(4, 4, [0; 4]),
            vec![None; 2],
            vec![Duration::from_millis(10); 2],
        )
        .expect("store");
        let mut budget = CacheBudget::default();
        budget.request(64 + 16);

        // Same key (raw/raw): kept, no charge
        assert!(admit(&mut store, &budget, 0, Image::filled(4, 4, [1; 4])));
        assert_eq!(store.current_cache_bytes(), 64);

        // Different key, smaller: charged by delta
        let small = Image::filled(2, 2, [0; 4]).with_edit_key("g".into());
        assert!(admit(&mut store, &budget, 0, small));
        assert_eq!(store.current_cache_bytes(), 16);

        // New slot: 16 + 64 = 80 fits exactly
        assert!(admit(&mut store, &budget, 1, Image::filled(4, 4, [0; 4])));
        assert_eq!(store.current_cache_bytes(), 80);

        // Growing slot 0 back to 64 would overshoot
        assert!(!admit(&mut store, &budget, 0, Image::filled(4, 4, [0; 4])));
        assert_eq!(store.current_cache_bytes(), 80);
    }
}
