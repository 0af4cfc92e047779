//! Decoded animation frames and their accounting size
//!
//! **Why**: The cache budget is expressed in bytes, so every decoded frame has to
//! report what it costs to keep resident. Frames are shared between the cache,
//! the preload worker and the display loop, so cloning must be cheap.
//!
//! **Used by**: FrameStore (resident slots), AnimatedImage (get/preload), editors
//!
//! # Edit keys
//!
//! A frame produced by an [`ImageEditor`](super::traits::ImageEditor) carries the
//! editor's [`EditKey`]. Raw decoder output carries none. The cache compares keys
//! to decide whether a resident frame already matches the active editor.

use image::RgbaImage;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// RGBA8 bytes per pixel
pub const BYTES_PER_PIXEL: i64 = 4;

/// Pixel dimensions of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes an RGBA8 buffer of this size occupies
    pub fn byte_size(&self) -> i64 {
        self.width as i64 * self.height as i64 * BYTES_PER_PIXEL
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Fingerprint of the post-processing applied to a frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EditKey(Arc<str>);

impl EditKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EditKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Single decoded frame (pixels + optional edit key)
///
/// Pixels live behind an `Arc`: clones share the buffer, so handing a frame to
/// the display loop never copies pixel data.
#[derive(Clone)]
pub struct Image {
    pixels: Arc<RgbaImage>,
    edit_key: Option<EditKey>,
}

impl Image {
    /// Wrap raw decoder output (no edit key)
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            edit_key: None,
        }
    }

    /// Solid color frame
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    /// Same pixels, tagged with `key`
    pub fn with_edit_key(self, key: EditKey) -> Self {
        Self {
            pixels: self.pixels,
            edit_key: Some(key),
        }
    }

    pub fn edit_key(&self) -> Option<&EditKey> {
        self.edit_key.as_ref()
    }

    /// True if no editor touched this frame
    pub fn is_raw(&self) -> bool {
        self.edit_key.is_none()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.pixels.width(), self.pixels.height())
    }

    /// Memory size in bytes (what the cache budget charges for this frame)
    pub fn byte_size(&self) -> i64 {
        self.dimensions().byte_size()
    }

    /// True if both handles point at the same pixel buffer
    pub fn shares_pixels(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("size", &self.dimensions())
            .field("edit_key", &self.edit_key)
            .finish()
    }
}

/// Errors that make an animated image unusable
///
/// Only construction can fail. Once built, a missing frame is reported as `None`.
#[derive(Error, Debug)]
pub enum AnimError {
    #[error("no registered decoder accepts this data")]
    NoDecoder,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("animation has no frames")]
    EmptyAnimation,
    #[error("decoder reported no duration for frame {0}")]
    MissingDuration(usize),
    #[error("first frame could not be decoded")]
    FirstFrame,
}

impl From<image::ImageError> for AnimError {
    fn from(e: image::ImageError) -> Self {
        AnimError::Decode(e.to_string())
    }
}
