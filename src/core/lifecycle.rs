//! Host lifecycle events and the cache's reaction to them
//!
//! The host (app shell, CLI, test) emits these on an [`EventBus`]:
//!
//! | Event | Reaction |
//! |-------|----------|
//! | [`MemoryWarning`] | clear on the worker pool, refresh the budget after a delay |
//! | [`EnteredBackground`] | clear synchronously |
//! | [`BecameActive`] | refresh the budget (auto mode only) |
//!
//! Subscriptions hold the image weakly; [`LifecycleHooks`] removes them on drop.

use log::{debug, info};
use std::sync::{Arc, Weak};

use super::animated::Shared;
use super::event_bus::{EventBus, SubscriptionId};

/// System is low on memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWarning;

/// Host went to the background
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnteredBackground;

/// Host is in the foreground again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BecameActive;

/// Live subscriptions of one image; unsubscribes on drop
pub struct LifecycleHooks {
    bus: EventBus,
    ids: Vec<SubscriptionId>,
}

impl LifecycleHooks {
    pub(super) fn install(bus: &EventBus, shared: &Arc<Shared>) -> Self {
        let mut ids = Vec::with_capacity(3);

        let weak = Arc::downgrade(shared);
        ids.push(bus.subscribe::<MemoryWarning, _>(move |_| {
            with_shared(&weak, |shared| {
                info!("Memory warning: releasing cached frames");
                shared.handle_memory_warning();
            })
        }));

        let weak = Arc::downgrade(shared);
        ids.push(bus.subscribe::<EnteredBackground, _>(move |_| {
            with_shared(&weak, |shared| {
                debug!("Entered background: clearing frame cache");
                shared.clear();
            })
        }));

        let weak = Arc::downgrade(shared);
        ids.push(bus.subscribe::<BecameActive, _>(move |_| {
            with_shared(&weak, |shared| shared.refresh_budget_if_auto())
        }));

        Self {
            bus: bus.clone(),
            ids,
        }
    }
}

fn with_shared(weak: &Weak<Shared>, f: impl FnOnce(&Arc<Shared>)) {
    if let Some(shared) = weak.upgrade() {
        f(&shared);
    }
}

impl Drop for LifecycleHooks {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}
