//! Procedural decoder: solid-color frames generated on demand
//!
//! Used by the CLI when no file is given, and by tests that need to count
//! decode calls, inject failures or slow decodes down.

use log::trace;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::frame::{Dimensions, Image};
use super::traits::AnimatedDecoder;

/// Shared decode counters (kept after the decoder moves into a cache)
#[derive(Debug, Default)]
pub struct DecodeCounter {
    decodes: AtomicUsize,
    raw_decodes: AtomicUsize,
}

impl DecodeCounter {
    /// Total `decode` calls
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    /// Calls made with `decompress = false` (edit path)
    pub fn raw_decodes(&self) -> usize {
        self.raw_decodes.load(Ordering::SeqCst)
    }
}

/// Generates `frame_count` frames of a fixed size, each a different hue
#[derive(Debug)]
pub struct SyntheticDecoder {
    frame_count: usize,
    size: Dimensions,
    duration: Duration,
    loop_count: usize,
    latency: Duration,
    failing: HashSet<usize>,
    missing_duration: Option<usize>,
    counter: Arc<DecodeCounter>,
}

impl SyntheticDecoder {
    pub fn new(frame_count: usize, width: u32, height: u32) -> Self {
        Self {
            frame_count,
            size: Dimensions::new(width, height),
            duration: Duration::from_millis(100),
            loop_count: 0,
            latency: Duration::ZERO,
            failing: HashSet::new(),
            missing_duration: None,
            counter: Arc::new(DecodeCounter::default()),
        }
    }

    /// Per-frame display duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_loop_count(mut self, loops: usize) -> Self {
        self.loop_count = loops;
        self
    }

    /// Sleep this long inside every decode
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Frames at these indices always fail to decode
    pub fn with_failing(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(indices);
        self
    }

    /// Report no duration for frame `index` (construction must fail)
    pub fn with_missing_duration(mut self, index: usize) -> Self {
        self.missing_duration = Some(index);
        self
    }

    pub fn counter(&self) -> Arc<DecodeCounter> {
        Arc::clone(&self.counter)
    }

    pub fn frame_bytes(&self) -> i64 {
        self.size.byte_size()
    }

    fn color(index: usize) -> [u8; 4] {
        let step = (index * 37 % 256) as u8;
        [step, 255 - step, (index * 91 % 256) as u8, 255]
    }
}

impl AnimatedDecoder for SyntheticDecoder {
    fn frame_count(&self) -> Option<usize> {
        (self.frame_count > 0).then_some(self.frame_count)
    }

    fn loop_count(&self) -> Option<usize> {
        Some(self.loop_count)
    }

    fn duration(&self, index: usize) -> Option<Duration> {
        if index >= self.frame_count || self.missing_duration == Some(index) {
            return None;
        }
        Some(self.duration)
    }

    fn frame_size(&self, index: usize) -> Option<Dimensions> {
        (index < self.frame_count).then_some(self.size)
    }

    fn decode(&self, index: usize, decompress: bool) -> Option<Image> {
        self.counter.decodes.fetch_add(1, Ordering::SeqCst);
        if !decompress {
            self.counter.raw_decodes.fetch_add(1, Ordering::SeqCst);
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if index >= self.frame_count || self.failing.contains(&index) {
            trace!("Synthetic frame {} unavailable", index);
            return None;
        }
        Some(Image::filled(self.size.width, self.size.height, Self::color(index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_decodes() {
        let decoder = SyntheticDecoder::new(3, 2, 2);
        let counter = decoder.counter();

        assert!(decoder.decode(0, true).is_some());
        assert!(decoder.decode(1, false).is_some());
        assert!(decoder.decode(5, true).is_none());
        assert_eq!(counter.decodes(), 3);
        assert_eq!(counter.raw_decodes(), 1);
    }

    #[test]
    fn test_failures_and_missing_durations() {
        let decoder = SyntheticDecoder::new(4, 2, 2)
            .with_failing([2])
            .with_missing_duration(3);
        assert!(decoder.decode(2, true).is_none());
        assert!(decoder.duration(3).is_none());
        assert_eq!(decoder.duration(1), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_zero_frames_reports_none() {
        assert_eq!(SyntheticDecoder::new(0, 1, 1).frame_count(), None);
    }
}
