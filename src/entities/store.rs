//! Per-index table of resident frames with incremental byte accounting
//!
//! **Why**: The preloader needs O(1) answers to "how many bytes are resident"
//! and "is this index cached" on every step. Totals are maintained on each
//! mutation, never recomputed by scanning.
//!
//! **Used by**: AnimatedImage (the only owner, always under its mutex)
//!
//! # Invariants
//!
//! - `current_cache_bytes == Σ byte_size` of slots holding an image
//! - `cached_frame_count == count` of slots holding an image
//! - slot count (`frame_count`) never changes after construction
//!
//! No locking here: thread-safety is the owner's job.

use std::time::Duration;

use super::frame::{AnimError, Dimensions, Image};

/// One animation frame slot
#[derive(Debug, Clone)]
pub struct FrameSlot {
    index: usize,
    image: Option<Image>,
    size: Option<Dimensions>,
    duration: Duration,
}

impl FrameSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    /// Last known size; kept after the image is dropped
    pub fn size(&self) -> Option<Dimensions> {
        self.size
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Bytes charged for this slot, `None` when nothing is resident
    pub fn byte_size(&self) -> Option<i64> {
        self.image.as_ref().map(Image::byte_size)
    }
}

/// Ordered frame slots plus aggregate accounting
#[derive(Debug)]
pub struct FrameStore {
    slots: Vec<FrameSlot>,
    cached_frame_count: usize,
    current_cache_bytes: i64,
}

impl FrameStore {
    /// Build the table with frame 0 already resident
    ///
    /// `sizes` may hold decoder-reported sizes (or `None`); `durations` must have
    /// one entry per frame.
    pub fn new(
        first: Image,
        sizes: Vec<Option<Dimensions>>,
        durations: Vec<Duration>,
    ) -> Result<Self, AnimError> {
        if durations.is_empty() {
            return Err(AnimError::EmptyAnimation);
        }

        let slots = durations
            .into_iter()
            .enumerate()
            .map(|(index, duration)| FrameSlot {
                index,
                image: None,
                size: sizes.get(index).copied().flatten(),
                duration,
            })
            .collect();

        let mut store = Self {
            slots,
            cached_frame_count: 0,
            current_cache_bytes: 0,
        };
        store.set(0, Some(first));
        Ok(store)
    }

    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    pub fn cached_frame_count(&self) -> usize {
        self.cached_frame_count
    }

    pub fn current_cache_bytes(&self) -> i64 {
        self.current_cache_bytes
    }

    pub fn is_fully_cached(&self) -> bool {
        self.cached_frame_count >= self.slots.len()
    }

    /// Cached frame at `index`, no side effects
    pub fn get(&self, index: usize) -> Option<Image> {
        self.slots.get(index).and_then(|slot| slot.image.clone())
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn duration(&self, index: usize) -> Option<Duration> {
        self.slots.get(index).map(|slot| slot.duration)
    }

    pub fn size(&self, index: usize) -> Option<Dimensions> {
        self.slots.get(index).and_then(|slot| slot.size)
    }

    /// Replace the frame at `index`, returning the previous one
    ///
    /// Counts and bytes follow the transition (None→Some, Some→None, Some→Some).
    /// Callers must pass `index < frame_count`.
    pub fn set(&mut self, index: usize, image: Option<Image>) -> Option<Image> {
        debug_assert!(index < self.slots.len(), "frame index {} out of range", index);
        let slot = &mut self.slots[index];

        let new_bytes = image.as_ref().map(Image::byte_size);
        if let Some(img) = &image {
            slot.size = Some(img.dimensions());
        }
        let old = std::mem::replace(&mut slot.image, image);
        let old_bytes = old.as_ref().map(Image::byte_size);

        match (old_bytes, new_bytes) {
            (None, Some(added)) => {
                self.cached_frame_count += 1;
                self.current_cache_bytes += added;
            }
            (Some(freed), None) => {
                self.cached_frame_count -= 1;
                self.current_cache_bytes -= freed;
            }
            (Some(freed), Some(added)) => {
                self.current_cache_bytes += added - freed;
            }
            (None, None) => {}
        }

        old
    }

    /// Drop the frame at `index` (if any)
    pub fn take(&mut self, index: usize) -> Option<Image> {
        self.set(index, None)
    }

    /// Drop every resident frame. Durations and sizes stay.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.image = None;
        }
        self.cached_frame_count = 0;
        self.current_cache_bytes = 0;
    }

    /// Indices currently holding a frame (ascending)
    pub fn cached_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|slot| slot.image.is_some())
            .map(|slot| slot.index)
            .collect()
    }

    /// Recount from scratch; test helper for the accounting invariants
    #[cfg(test)]
    pub(crate) fn recount(&self) -> (usize, i64) {
        self.slots
            .iter()
            .filter_map(FrameSlot::byte_size)
            .fold((0, 0), |(count, bytes), b| (count + 1, bytes + b))
    }
}
