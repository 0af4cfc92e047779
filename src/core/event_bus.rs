//! Pub/Sub Event Bus for host notifications.
//!
//! Architecture:
//! - Components subscribe to event types with callbacks
//! - emit() invokes matching callbacks synchronously on the emitting thread
//! - subscribe() returns a [`SubscriptionId`] so one listener can leave
//!   without touching the others
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! Cross-type order undefined - don't rely on ordering between different event types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

// Blanket impl for all qualifying types
impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased callback
type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    seq: u64,
}

type Registry = HashMap<TypeId, Vec<(u64, Callback)>>;

/// Synchronous pub/sub bus. Clones share subscribers.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Registry>>,
    next_seq: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to events of type E.
    ///
    /// Callback is invoked on the thread that calls emit().
    ///
    /// # Example
    /// ```ignore
    /// let id = bus.subscribe::<MemoryWarning, _>(move |_| {
    ///     image.clear_async();
    /// });
    /// bus.unsubscribe(id);
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(type_id)
            .or_default()
            .push((seq, wrapped));
        SubscriptionId { type_id, seq }
    }

    /// Invoke every callback subscribed to E.
    ///
    /// Callbacks run after the registry lock is released, so they may
    /// subscribe or unsubscribe themselves.
    pub fn emit<E: Event>(&self, event: E) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|cbs| cbs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for cb in callbacks {
            cb(&event);
        }
    }

    /// Remove one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = subs.get_mut(&id.type_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(seq, _)| *seq != id.seq);
        let removed = list.len() != before;
        if list.is_empty() {
            subs.remove(&id.type_id);
        }
        removed
    }

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).remove(&TypeId::of::<E>());
    }

    /// Clear all subscribers
    pub fn clear(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Check if there are subscribers for event type E
    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Clone, Debug)]
    struct TestEvent { value: i32 }

    #[derive(Clone, Debug)]
    struct OtherEvent;

    #[test]
    fn test_subscribe_emit_immediate() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);

        bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        bus.emit(TestEvent { value: 5 });
        assert_eq!(counter.load(Ordering::SeqCst), 15);

        // Other types don't reach it
        bus.emit(OtherEvent);
        assert_eq!(counter.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let counter1 = Arc::new(AtomicI32::new(0));
        let counter2 = Arc::new(AtomicI32::new(0));

        let c1 = Arc::clone(&counter1);
        bus.subscribe::<TestEvent, _>(move |e| {
            c1.fetch_add(e.value, Ordering::SeqCst);
        });

        let c2 = Arc::clone(&counter2);
        bus.subscribe::<TestEvent, _>(move |e| {
            c2.fetch_add(e.value * 2, Ordering::SeqCst);
        });

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter1.load(Ordering::SeqCst), 10);
        assert_eq!(counter2.load(Ordering::SeqCst), 20);
        assert_eq!(bus.subscriber_count::<TestEvent>(), 2);
    }

    #[test]
    fn test_unsubscribe_single() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));

        let c1 = Arc::clone(&counter);
        let first = bus.subscribe::<TestEvent, _>(move |e| {
            c1.fetch_add(e.value, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        bus.subscribe::<TestEvent, _>(move |e| {
            c2.fetch_add(e.value * 100, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));

        bus.emit(TestEvent { value: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_unsubscribe_all() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);

        bus.subscribe::<TestEvent, _>(move |e| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });
        assert!(bus.has_subscribers::<TestEvent>());

        bus.unsubscribe_all::<TestEvent>();
        assert!(!bus.has_subscribers::<TestEvent>());

        bus.emit(TestEvent { value: 10 });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let slot: Arc<std::sync::Mutex<Option<SubscriptionId>>> = Arc::default();

        let (c, b, s) = (Arc::clone(&counter), bus.clone(), Arc::clone(&slot));
        let id = bus.subscribe::<TestEvent, _>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = s.lock().unwrap().take() {
                b.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit(TestEvent { value: 0 });
        bus.emit(TestEvent { value: 0 });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
