//! Abstract traits for dependency inversion.
//!
//! These traits define what the cache engine needs from decoders, editors and
//! the thread pool, so `core` never depends on a concrete codec or executor.
//!
//! Implementations: `entities::loader` (codecs), `entities::synthetic`,
//! `entities::editors`, `core::workers`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::frame::{AnimError, Dimensions, EditKey, Image};

/// Random-access decoder over one animated image.
///
/// Decoding is assumed expensive and blocking. The engine never calls
/// `decode` while holding its lock.
pub trait AnimatedDecoder: Send + Sync {
    /// Number of frames, `None` if the container could not be read
    fn frame_count(&self) -> Option<usize>;

    /// Loop count from the container (0 = forever), `None` if absent
    fn loop_count(&self) -> Option<usize>;

    /// Display duration of frame `index`
    fn duration(&self, index: usize) -> Option<Duration>;

    /// Frame size without decoding, if the container knows it
    fn frame_size(&self, index: usize) -> Option<Dimensions> {
        let _ = index;
        None
    }

    /// Decode frame `index`.
    ///
    /// `decompress` is true when the result goes straight to display or cache,
    /// false when it is about to be handed to an editor.
    fn decode(&self, index: usize, decompress: bool) -> Option<Image>;
}

/// Entry in the decoder priority list: "can you read this" + "open it".
pub trait DecoderFactory: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Cheap sniff (magic bytes, chunk markers)
    fn can_decode(&self, data: &[u8]) -> bool;

    fn open(&self, data: Arc<[u8]>) -> Result<Box<dyn AnimatedDecoder>, AnimError>;
}

/// Pure transform of a decoded frame, identified by a key.
pub trait ImageEditor: Send + Sync {
    /// Fingerprint stamped on every frame this editor produces
    fn key(&self) -> &EditKey;

    /// True if the editor still waits for external data; such editors are rejected
    fn needs_data(&self) -> bool {
        false
    }

    fn edit(&self, image: &Image) -> Option<Image>;
}

pub type EditorHandle = Arc<dyn ImageEditor>;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstract worker pool interface.
///
/// Lets the cache schedule preload passes and async clears without knowing
/// the concrete thread pool implementation.
pub trait WorkerPool: Send + Sync {
    /// Run `job` on a worker thread
    fn execute(&self, job: Job);

    /// Run `job` only if `epoch` still equals `expected` when a worker picks it up.
    ///
    /// Stale jobs are dropped without running.
    fn execute_with_epoch(&self, epoch: Arc<AtomicU64>, expected: u64, job: Job) {
        self.execute(Box::new(move || {
            if epoch.load(Ordering::SeqCst) == expected {
                job();
            }
        }));
    }
}

/// Blanket impl: Arc<T> implements traits if T does
impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }

    fn execute_with_epoch(&self, epoch: Arc<AtomicU64>, expected: u64, job: Job) {
        (**self).execute_with_epoch(epoch, expected, job)
    }
}
