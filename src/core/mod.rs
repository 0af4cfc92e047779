//! Core engine modules - cache, preload, lifecycle, player, workers
//!
//! These modules form the frame cache engine, independent of any codec.

pub mod animated;
pub mod cache_man;
pub mod event_bus;
pub mod lifecycle;
pub mod player;
pub mod preloader;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use animated::{AnimatedImage, CacheOptions, CacheStats, ViewId};
pub use cache_man::{BudgetPolicy, CacheBudget, Epoch, FixedMemory, MemoryProbe, SystemMemory};
pub use event_bus::{EventBus, SubscriptionId};
pub use lifecycle::{BecameActive, EnteredBackground, LifecycleHooks, MemoryWarning};
pub use player::{PlaybackStats, Player};
pub use workers::Workers;
