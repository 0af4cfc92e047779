//! Pixel editors applied to decoded frames before display.
//!
//! Each editor stamps its [`EditKey`] on the output so the cache can tell an
//! edited frame from a raw one. Keys include parameters: `brightness:20` and
//! `brightness:-20` are different edits.
//!
//! | Editor | Key | Operation |
//! |--------|-----|-----------|
//! | [`Grayscale`] | `grayscale` | luma, alpha preserved |
//! | [`Invert`] | `invert` | `255 - c` on RGB |
//! | [`Brightness`] | `brightness:N` | add `N` to RGB, clamped |

use image::{imageops, DynamicImage};
use std::str::FromStr;
use std::sync::Arc;

use super::frame::{EditKey, Image};
use super::traits::{EditorHandle, ImageEditor};

/// Luma conversion keeping alpha
#[derive(Debug, Clone)]
pub struct Grayscale {
    key: EditKey,
}

impl Default for Grayscale {
    fn default() -> Self {
        Self { key: EditKey::from("grayscale") }
    }
}

impl ImageEditor for Grayscale {
    fn key(&self) -> &EditKey {
        &self.key
    }

    fn edit(&self, image: &Image) -> Option<Image> {
        let luma = imageops::grayscale_alpha(image.pixels());
        Some(Image::new(DynamicImage::ImageLumaA8(luma).into_rgba8()))
    }
}

/// Color inversion (alpha untouched)
#[derive(Debug, Clone)]
pub struct Invert {
    key: EditKey,
}

impl Default for Invert {
    fn default() -> Self {
        Self { key: EditKey::from("invert") }
    }
}

impl ImageEditor for Invert {
    fn key(&self) -> &EditKey {
        &self.key
    }

    fn edit(&self, image: &Image) -> Option<Image> {
        let mut pixels = image.pixels().clone();
        imageops::invert(&mut pixels);
        Some(Image::new(pixels))
    }
}

/// Additive brightness
#[derive(Debug, Clone)]
pub struct Brightness {
    amount: i32,
    key: EditKey,
}

impl Brightness {
    pub fn new(amount: i32) -> Self {
        Self {
            amount,
            key: EditKey::new(format!("brightness:{}", amount)),
        }
    }

    pub fn amount(&self) -> i32 {
        self.amount
    }
}

impl ImageEditor for Brightness {
    fn key(&self) -> &EditKey {
        &self.key
    }

    fn edit(&self, image: &Image) -> Option<Image> {
        Some(Image::new(imageops::brighten(image.pixels(), self.amount)))
    }
}

/// Editor that reports it still waits for external data (always rejected)
#[derive(Debug, Clone)]
pub struct Pending {
    key: EditKey,
}

impl Pending {
    pub fn new(key: &str) -> Self {
        Self { key: EditKey::from(key) }
    }
}

impl ImageEditor for Pending {
    fn key(&self) -> &EditKey {
        &self.key
    }

    fn needs_data(&self) -> bool {
        true
    }

    fn edit(&self, _image: &Image) -> Option<Image> {
        None
    }
}

/// CLI/config spelling of an editor: `grayscale`, `invert`, `brightness:N`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorSpec {
    Grayscale,
    Invert,
    Brightness(i32),
}

impl EditorSpec {
    pub fn build(self) -> EditorHandle {
        match self {
            EditorSpec::Grayscale => Arc::new(Grayscale::default()),
            EditorSpec::Invert => Arc::new(Invert::default()),
            EditorSpec::Brightness(amount) => Arc::new(Brightness::new(amount)),
        }
    }
}

impl FromStr for EditorSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.split_once(':') {
            None if lower == "grayscale" || lower == "gray" => Ok(EditorSpec::Grayscale),
            None if lower == "invert" => Ok(EditorSpec::Invert),
            Some(("brightness", amount)) => amount
                .parse::<i32>()
                .map(EditorSpec::Brightness)
                .map_err(|e| format!("invalid brightness '{}': {}", amount, e)),
            _ => Err(format!(
                "unknown editor '{}' (expected grayscale, invert or brightness:N)",
                s
            )),
        }
    }
}
