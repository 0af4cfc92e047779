//! Display loop driving an [`AnimatedImage`]
//!
//! **Why**: The cache only pays off if the display side never decodes. The
//! player asks for frames with `decode_if_needed = false` and leaves decoding
//! to the preload pass it kicks ahead of itself.
//!
//! **Used by**: CLI playback, cache tests
//!
//! # Timing Model
//!
//! Each frame is shown for its own duration. `tick(dt)` adds wall time to the
//! current frame and moves on at most one frame per tick; leftover time
//! carries over to the next frame.
//! If the current frame is not cached: display last good frame (no black
//! flash), count a stall, kick a preload from it and do not advance the clock.
//!
//! # Partial budgets
//!
//! A fill pass stops at the first frame that doesn't fit, so with a budget
//! smaller than the animation some frames are never cached. When the pass
//! kicked for a missing frame has finished and the frame is still missing,
//! the player decodes it directly for display. The result is not cached.
//!
//! # Loops
//!
//! `loop_count` from the container: 0 plays forever, N stops on the last
//! frame after N complete loops.

use log::{debug, trace};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::animated::{AnimatedImage, ViewId};
use crate::entities::frame::Image;

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Ticks that showed the current frame
    pub shown: usize,
    /// Ticks that had to repeat the last frame because the current one wasn't cached
    pub stalls: usize,
    /// Frame advances
    pub advanced: usize,
    pub loops_completed: usize,
    /// Frames decoded on the spot because the cache could not hold them
    pub direct_decodes: usize,
}

impl fmt::Display for PlaybackStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} shown, {} stalled, {} advances, {} loops, {} direct decodes",
            self.shown, self.stalls, self.advanced, self.loops_completed, self.direct_decodes
        )
    }
}

/// Plays one animated image as an attached view
pub struct Player {
    image: Arc<AnimatedImage>,
    view: ViewId,
    current: usize,
    elapsed: Duration,
    last_frame: Option<Image>,
    /// Frame a preload was kicked for after a miss
    awaiting: Option<usize>,
    finished: bool,
    stats: PlaybackStats,
}

impl Player {
    /// Attach a fresh view and start preloading from frame 0
    pub fn new(image: Arc<AnimatedImage>) -> Self {
        let view = Uuid::new_v4();
        image.attach_view(view);
        image.start_preload(0);
        debug!("Player {} attached ({} frames)", view, image.frame_count());
        Self {
            image,
            view,
            current: 0,
            elapsed: Duration::ZERO,
            last_frame: None,
            awaiting: None,
            finished: false,
            stats: PlaybackStats::default(),
        }
    }

    /// Advance playback by `dt` and return the frame to display.
    ///
    /// `None` only before the first frame has ever been available.
    pub fn tick(&mut self, dt: Duration) -> Option<Image> {
        if self.finished {
            return self.last_frame.clone();
        }

        let frame = self
            .image
            .get_frame(self.current, false)
            .or_else(|| self.decode_uncacheable());

        match frame {
            Some(frame) => {
                self.awaiting = None;
                self.last_frame = Some(frame);
                self.stats.shown += 1;
                self.elapsed += dt;
                self.advance();
            }
            None => {
                trace!("Frame {} not cached, holding last frame", self.current);
                self.stats.stalls += 1;
                self.awaiting = Some(self.current);
                self.image.start_preload(self.current);
            }
        }
        self.last_frame.clone()
    }

    /// Decode the current frame if the pass kicked for it is over and didn't cache it
    fn decode_uncacheable(&mut self) -> Option<Image> {
        if self.awaiting != Some(self.current) || self.image.is_preloading() {
            return None;
        }
        let frame = self.image.get_frame(self.current, true)?;
        trace!("Frame {} decoded for display, outside the cache budget", self.current);
        self.stats.direct_decodes += 1;
        Some(frame)
    }

    fn advance(&mut self) {
        let Some(duration) = self.image.duration(self.current) else {
            return;
        };
        if self.elapsed < duration {
            return;
        }
        self.elapsed -= duration;

        let mut next = self.current + 1;
        if next >= self.image.frame_count() {
            self.stats.loops_completed += 1;
            let loops = self.image.loop_count();
            if loops > 0 && self.stats.loops_completed >= loops {
                debug!("Playback finished after {} loops", self.stats.loops_completed);
                self.finished = true;
                self.elapsed = Duration::ZERO;
                return;
            }
            next = 0;
        }

        self.current = next;
        self.stats.advanced += 1;
        self.image.start_preload(next);
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn view_id(&self) -> ViewId {
        self.view
    }

    pub fn image(&self) -> &Arc<AnimatedImage> {
        &self.image
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.image.detach_view(self.view);
    }
}
