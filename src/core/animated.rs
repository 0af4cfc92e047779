//! Animated image with a budgeted frame cache
//!
//! **Why**: Decoding every frame of a large GIF/APNG up front can cost
//! hundreds of megabytes. AnimatedImage keeps decoded frames resident only up
//! to a byte budget and feeds the display loop on demand, while a background
//! pass (see `preloader`) fills or trims the cache ahead of playback.
//!
//! **Used by**: Player, the CLI, anything that displays animation frames
//!
//! # Locking
//!
//! One mutex guards the frame table, the budget, the editor, the preload
//! marker and the attached views. It is held for table work only: decode and
//! edit calls always run with the lock released.
//!
//! # Cancellation
//!
//! Each image owns an [`Epoch`]. `clear`, `cancel_preload`, `preload_all`
//! and drop bump it; a preload pass captured under an older value stops
//! before its next mutation.

use indexmap::IndexSet;
use log::{debug, info, trace, warn};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use super::cache_man::{BudgetPolicy, CacheBudget, Epoch, MemoryProbe, SystemMemory};
use super::event_bus::EventBus;
use super::lifecycle::LifecycleHooks;
use super::workers::Workers;
use crate::entities::frame::{AnimError, Dimensions, Image};
use crate::entities::loader::DecoderRegistry;
use crate::entities::store::FrameStore;
use crate::entities::traits::{AnimatedDecoder, EditorHandle, WorkerPool};

/// Identifier of a view displaying an image
pub type ViewId = Uuid;

/// Process-wide pool used when no pool is supplied
static DEFAULT_WORKERS: Lazy<Arc<Workers>> =
    Lazy::new(|| Arc::new(Workers::new(Workers::default_thread_count())));

/// Collaborators and tunables for an [`AnimatedImage`]
#[derive(Clone)]
pub struct CacheOptions {
    /// Where preload passes and async clears run
    pub workers: Arc<dyn WorkerPool>,
    /// Memory figures for the auto budget
    pub memory: Arc<dyn MemoryProbe>,
    pub policy: BudgetPolicy,
    /// Delay between a memory-warning clear and the budget refresh
    pub refresh_delay: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        let workers: Arc<dyn WorkerPool> = DEFAULT_WORKERS.clone();
        Self {
            workers,
            memory: Arc::new(SystemMemory::new()),
            policy: BudgetPolicy::default(),
            refresh_delay: Duration::from_secs(2),
        }
    }
}

impl CacheOptions {
    pub fn with_workers(mut self, workers: Arc<dyn WorkerPool>) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_policy(mut self, policy: BudgetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }
}

/// Preload marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PreloadState {
    Idle,
    Running { generation: u64 },
}

/// Everything behind the mutex
pub(super) struct CacheState {
    pub(super) store: FrameStore,
    pub(super) budget: CacheBudget,
    pub(super) editor: Option<EditorHandle>,
    pub(super) preload: PreloadState,
    pub(super) views: IndexSet<ViewId>,
}

/// State shared with worker jobs (they hold it weakly)
pub(super) struct Shared {
    pub(super) state: Mutex<CacheState>,
    pub(super) epoch: Epoch,
    pub(super) decoder: Box<dyn AnimatedDecoder>,
    pub(super) frame_count: usize,
    pub(super) loop_count: usize,
    pub(super) workers: Arc<dyn WorkerPool>,
    pub(super) memory: Arc<dyn MemoryProbe>,
    pub(super) policy: BudgetPolicy,
    pub(super) refresh_delay: Duration,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn get_frame(&self, index: usize, decode_if_needed: bool) -> Option<Image> {
        if index >= self.frame_count {
            return None;
        }
        let (cached, editor) = {
            let state = self.lock();
            (state.store.get(index), state.editor.clone())
        };
        self.resolve(index, cached, editor.as_ref(), decode_if_needed)
    }

    /// Pick, decode or edit the frame to hand out. Runs without the lock.
    fn resolve(
        &self,
        index: usize,
        cached: Option<Image>,
        editor: Option<&EditorHandle>,
        decode_if_needed: bool,
    ) -> Option<Image> {
        match (cached, editor) {
            (Some(image), Some(editor)) => {
                if image.edit_key() == Some(editor.key()) {
                    return Some(image);
                }
                if !decode_if_needed {
                    return None;
                }
                let source = if image.is_raw() {
                    image
                } else {
                    self.decode(index, false)?
                };
                self.apply(index, editor, &source)
            }
            (Some(image), None) => {
                if image.is_raw() {
                    Some(image)
                } else if decode_if_needed {
                    self.decode(index, true)
                } else {
                    None
                }
            }
            (None, _) if !decode_if_needed => None,
            (None, Some(editor)) => {
                let source = self.decode(index, false)?;
                self.apply(index, editor, &source)
            }
            (None, None) => self.decode(index, true),
        }
    }

    fn decode(&self, index: usize, decompress: bool) -> Option<Image> {
        let image = self.decoder.decode(index, decompress);
        match &image {
            Some(img) => trace!("Decoded frame {} ({})", index, img.dimensions()),
            None => debug!("Frame {} failed to decode", index),
        }
        image
    }

    fn apply(&self, index: usize, editor: &EditorHandle, source: &Image) -> Option<Image> {
        match editor.edit(source) {
            Some(edited) => Some(edited.with_edit_key(editor.key().clone())),
            None => {
                debug!("Editor '{}' failed on frame {}", editor.key(), index);
                None
            }
        }
    }

    pub(super) fn clear(&self) {
        let mut state = self.lock();
        self.epoch.increment();
        state.preload = PreloadState::Idle;
        state.store.clear();
        debug!("Frame cache cleared");
    }

    pub(super) fn clear_async(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.workers.execute(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.clear();
            }
        }));
    }

    pub(super) fn cancel_preload(&self) {
        let mut state = self.lock();
        if let PreloadState::Running { generation } = state.preload {
            self.epoch.increment();
            state.preload = PreloadState::Idle;
            debug!("Preload pass {} cancelled", generation);
        }
    }

    /// Probe memory without the lock, then store the value if still in auto mode
    pub(super) fn refresh_budget_if_auto(&self) {
        if !self.lock().budget.is_auto() {
            return;
        }
        let bytes = self.policy.compute(self.memory.as_ref());
        if let Some(bytes) = self.lock().budget.refresh(bytes) {
            trace!("Budget refreshed: {} bytes", bytes);
        }
    }

    /// Memory warning: clear off-thread, then refresh the budget after `refresh_delay`
    pub(super) fn handle_memory_warning(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.workers.execute(Box::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.clear();
            schedule_refresh(Arc::downgrade(&shared), shared.refresh_delay);
        }));
    }
}

fn schedule_refresh(weak: Weak<Shared>, delay: Duration) {
    let spawned = thread::Builder::new()
        .name("animcache-budget-refresh".into())
        .spawn(move || {
            thread::sleep(delay);
            if let Some(shared) = weak.upgrade() {
                shared.refresh_budget_if_auto();
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to schedule budget refresh: {}", e);
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub frame_count: usize,
    pub cached_frames: usize,
    pub cached_bytes: i64,
    pub budget: i64,
    pub auto_budget: bool,
    pub preloading: bool,
    pub views: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let budget = if self.budget == i64::MAX {
            "unbounded".to_string()
        } else {
            format!("{:.1} MB", self.budget as f64 / (1024.0 * 1024.0))
        };
        write!(
            f,
            "{}/{} frames cached, {:.1} MB / {}{}{}",
            self.cached_frames,
            self.frame_count,
            self.cached_bytes as f64 / (1024.0 * 1024.0),
            budget,
            if self.auto_budget { " (auto)" } else { "" },
            if self.preloading { ", preloading" } else { "" },
        )
    }
}

/// Multi-frame image with a budgeted cache and background preload
///
/// # Example
/// ```ignore
/// let registry = DecoderRegistry::default();
/// let image = AnimatedImage::from_data(bytes, &registry, CacheOptions::default())?;
/// image.start_preload(0);
/// let frame = image.get_frame(0, false);
/// ```
pub struct AnimatedImage {
    shared: Arc<Shared>,
    hooks: Mutex<Option<LifecycleHooks>>,
}

impl AnimatedImage {
    /// Build from an opened decoder.
    ///
    /// Frame 0 is decoded eagerly and cached. Fails if the decoder cannot
    /// report a frame count, a duration for every frame, or frame 0 itself.
    pub fn new(decoder: Box<dyn AnimatedDecoder>, options: CacheOptions) -> Result<Self, AnimError> {
        let frame_count = decoder
            .frame_count()
            .filter(|&n| n > 0)
            .ok_or(AnimError::EmptyAnimation)?;
        let durations = (0..frame_count)
            .map(|i| decoder.duration(i).ok_or(AnimError::MissingDuration(i)))
            .collect::<Result<Vec<_>, _>>()?;
        let sizes = (0..frame_count).map(|i| decoder.frame_size(i)).collect();
        let first = decoder.decode(0, true).ok_or(AnimError::FirstFrame)?;
        let loop_count = decoder.loop_count().unwrap_or(0);

        let store = FrameStore::new(first, sizes, durations)?;
        let mut budget = CacheBudget::default();
        budget.refresh(options.policy.compute(options.memory.as_ref()));

        info!(
            "AnimatedImage: {} frames, loop count {}, first frame {} bytes, budget {} bytes",
            frame_count,
            loop_count,
            store.current_cache_bytes(),
            budget.max_cache_bytes()
        );

        let shared = Shared {
            state: Mutex::new(CacheState {
                store,
                budget,
                editor: None,
                preload: PreloadState::Idle,
                views: IndexSet::new(),
            }),
            epoch: Epoch::new(),
            decoder,
            frame_count,
            loop_count,
            workers: options.workers,
            memory: options.memory,
            policy: options.policy,
            refresh_delay: options.refresh_delay,
        };

        Ok(Self {
            shared: Arc::new(shared),
            hooks: Mutex::new(None),
        })
    }

    /// Build from encoded bytes, picking the first registry decoder that accepts them
    pub fn from_data(
        data: impl Into<Arc<[u8]>>,
        registry: &DecoderRegistry,
        options: CacheOptions,
    ) -> Result<Self, AnimError> {
        let decoder = registry.open(data.into())?;
        Self::new(decoder, options)
    }

    // ========== Frames ==========

    /// Frame for display.
    ///
    /// Returns the cached frame when it matches the current editor. Otherwise
    /// decodes (and edits) only if `decode_if_needed`. The result is never
    /// written back into the cache.
    pub fn get_frame(&self, index: usize, decode_if_needed: bool) -> Option<Image> {
        self.shared.get_frame(index, decode_if_needed)
    }

    pub fn frame_count(&self) -> usize {
        self.shared.frame_count
    }

    /// 0 = loop forever
    pub fn loop_count(&self) -> usize {
        self.shared.loop_count
    }

    pub fn duration(&self, index: usize) -> Option<Duration> {
        if index >= self.shared.frame_count {
            return None;
        }
        self.shared.lock().store.duration(index)
    }

    /// Last known size of frame `index` (from the container or a decode)
    pub fn frame_size(&self, index: usize) -> Option<Dimensions> {
        self.shared.lock().store.size(index)
    }

    /// Indices currently resident (ascending)
    pub fn cached_indices(&self) -> Vec<usize> {
        self.shared.lock().store.cached_indices()
    }

    // ========== Budget ==========

    /// `>= 0` pins the budget in bytes; negative switches to auto and recomputes
    pub fn set_budget(&self, bytes: i64) {
        let auto = (bytes < 0).then(|| self.shared.policy.compute(self.shared.memory.as_ref()));
        let mut state = self.shared.lock();
        if state.budget.request(bytes) {
            if let Some(auto) = auto {
                state.budget.refresh(auto);
            }
            info!("Cache budget set to auto: {} bytes", state.budget.max_cache_bytes());
        }
    }

    pub fn budget(&self) -> i64 {
        self.shared.lock().budget.max_cache_bytes()
    }

    pub fn is_auto_budget(&self) -> bool {
        self.shared.lock().budget.is_auto()
    }

    pub fn current_bytes(&self) -> i64 {
        self.shared.lock().store.current_cache_bytes()
    }

    pub fn cached_frame_count(&self) -> usize {
        self.shared.lock().store.cached_frame_count()
    }

    /// Recompute the budget from system memory (auto mode only)
    pub fn refresh_budget_if_auto(&self) {
        self.shared.refresh_budget_if_auto();
    }

    // ========== Preload / clear ==========

    /// Start a background pass from `from`. Returns false if nothing was scheduled.
    pub fn start_preload(&self, from: usize) -> bool {
        self.shared.start_preload(from)
    }

    /// Decode and cache every frame on the calling thread, lifting the budget.
    ///
    /// Meant for small animations, from a thread other than the display loop.
    pub fn preload_all(&self) {
        self.shared.preload_all();
    }

    pub fn is_preloading(&self) -> bool {
        matches!(self.shared.lock().preload, PreloadState::Running { .. })
    }

    pub fn cancel_preload(&self) {
        self.shared.cancel_preload();
    }

    /// Drop every cached frame (also cancels a running pass). Idempotent.
    pub fn clear(&self) {
        self.shared.clear();
    }

    /// [`clear`](Self::clear) on the worker pool
    pub fn clear_async(&self) {
        self.shared.clear_async();
    }

    // ========== Editor ==========

    /// Set or remove the editor. Editors that still need data are rejected.
    pub fn set_editor(&self, editor: Option<EditorHandle>) -> bool {
        if let Some(e) = &editor {
            if e.needs_data() {
                debug!("Editor '{}' rejected: waiting for data", e.key());
                return false;
            }
        }
        let mut state = self.shared.lock();
        debug!(
            "Editor: {}",
            editor.as_ref().map(|e| e.key().to_string()).unwrap_or_else(|| "none".into())
        );
        state.editor = editor;
        true
    }

    pub fn editor(&self) -> Option<EditorHandle> {
        self.shared.lock().editor.clone()
    }

    // ========== Views ==========

    /// Register a view. Returns false if it was already attached.
    pub fn attach_view(&self, id: ViewId) -> bool {
        let mut state = self.shared.lock();
        let added = state.views.insert(id);
        trace!("View {} attached ({} total)", id, state.views.len());
        added
    }

    /// Unregister a view. The last detach cancels the preload and clears asynchronously.
    pub fn detach_view(&self, id: ViewId) -> bool {
        let last = {
            let mut state = self.shared.lock();
            if !state.views.shift_remove(&id) {
                return false;
            }
            state.views.is_empty()
        };
        if last {
            debug!("Last view detached, releasing frames");
            self.shared.cancel_preload();
            self.shared.clear_async();
        }
        true
    }

    pub fn view_count(&self) -> usize {
        self.shared.lock().views.len()
    }

    // ========== Lifecycle ==========

    /// React to host events on `bus` until this image drops.
    ///
    /// Calling again replaces the previous subscription.
    pub fn observe_lifecycle(&self, bus: &EventBus) {
        let hooks = LifecycleHooks::install(bus, &self.shared);
        *self.hooks.lock().unwrap_or_else(|e| e.into_inner()) = Some(hooks);
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock();
        CacheStats {
            frame_count: self.shared.frame_count,
            cached_frames: state.store.cached_frame_count(),
            cached_bytes: state.store.current_cache_bytes(),
            budget: state.budget.max_cache_bytes(),
            auto_budget: state.budget.is_auto(),
            preloading: matches!(state.preload, PreloadState::Running { .. }),
            views: state.views.len(),
        }
    }

    /// Current generation (diagnostics)
    pub fn generation(&self) -> u64 {
        self.shared.epoch.current()
    }
}

impl fmt::Debug for AnimatedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimatedImage").field("stats", &self.stats()).finish()
    }
}

impl Drop for AnimatedImage {
    fn drop(&mut self) {
        self.shared.epoch.increment();
        trace!("AnimatedImage dropped, pending passes invalidated");
    }
}
