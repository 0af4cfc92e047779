//! Entities module - frames, frame storage and the traits the engine depends on
//!
//! Concrete decoders (GIF/APNG, synthetic) and editors live here too, behind
//! the traits in [`traits`], so `core` never names a codec.

pub mod editors;
pub mod frame;
pub mod loader;
pub mod store;
pub mod synthetic;
pub mod traits;

pub use editors::{Brightness, EditorSpec, Grayscale, Invert};
pub use frame::{AnimError, Dimensions, EditKey, Image};
pub use loader::{ApngFactory, CodecDecoder, DecoderRegistry, GifFactory};
pub use store::{FrameSlot, FrameStore};
pub use synthetic::{DecodeCounter, SyntheticDecoder};
pub use traits::{AnimatedDecoder, DecoderFactory, EditorHandle, ImageEditor, Job, WorkerPool};
