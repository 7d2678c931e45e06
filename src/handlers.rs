//! Observer registration for the event-sourcing adapters
//!
//! Handlers are keyed by id in a map, not held in an index-addressed vector,
//! so dropping one subscription mid-delivery never disturbs the others.
//! `emit` snapshots the current handler set before invoking anything, which
//! makes it safe for a handler to subscribe or unsubscribe reentrantly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct RegistryInner<E> {
    next_id: u64,
    handlers: HashMap<u64, Handler<E>>,
}

/// A set of event handlers with scoped unsubscription.
pub struct HandlerRegistry<E> {
    inner: Arc<Mutex<RegistryInner<E>>>,
}

impl<E> Clone for HandlerRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

// The unsubscribe guard holds a `Weak` to the registry inside a boxed
// closure, so the event type must outlive the guard.
impl<E: 'static> HandlerRegistry<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    /// Register a handler. Unsubscribes when the returned guard is dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("handler registry poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.insert(id, Arc::new(handler));

        let inner = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    if let Ok(mut inner) = inner.lock() {
                        inner.handlers.remove(&id);
                    }
                }
            }),
        }
    }

    /// Deliver an event to every currently-registered handler.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = {
            let inner = self.inner.lock().expect("handler registry poisoned");
            inner.handlers.values().cloned().collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("handler registry poisoned").handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subscription guard; dropping it removes the handler.
pub struct Subscription {
    unsubscribe: Box<dyn FnOnce() + Send>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let f = std::mem::replace(&mut self.unsubscribe, Box::new(|| {}));
        f();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_handlers() {
        let registry: HandlerRegistry<u32> = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let _s1 = registry.subscribe(move |v| {
            c1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        let _s2 = registry.subscribe(move |v| {
            c2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        registry.emit(&3);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry: HandlerRegistry<()> = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let sub = registry.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registry.emit(&());
        drop(sub);
        registry.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_during_delivery_leaves_others_intact() {
        let registry: HandlerRegistry<()> = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        // First handler drops its own subscription on delivery.
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot2 = Arc::clone(&slot);
        let sub = registry.subscribe(move |_| {
            slot2.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        let c = Arc::clone(&count);
        let _survivor = registry.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(&());
        registry.emit(&());

        // The survivor saw both emissions.
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry: HandlerRegistry<String> = HandlerRegistry::new();
        let sub = registry.subscribe(|_| {});
        drop(registry);
        // The guard's weak reference is dangling; dropping it is a no-op.
        drop(sub);
    }
}
