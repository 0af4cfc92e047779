//! animcache - budgeted frame cache and background preloader for animated images
//!
//! Re-exports all modules for use by binary targets.

// Core engine (cache, preload, lifecycle, player, workers)
pub mod core;

// Frames, decoders, editors
pub mod entities;

// App modules
pub mod cli;
pub mod config;

// Re-export commonly used types from core
pub use core::animated::{AnimatedImage, CacheOptions, CacheStats, ViewId};
pub use core::event_bus::EventBus;
pub use core::lifecycle::{BecameActive, EnteredBackground, MemoryWarning};
pub use core::player::Player;

// Re-export entities
pub use entities::{AnimError, DecoderRegistry, EditKey, Image};
