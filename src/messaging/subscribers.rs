use crate::client::ConnectionSnapshot;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

type Callback = Arc<dyn Fn(&ConnectionSnapshot) + Send + Sync + 'static>;

/// Identifies one registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer registry. Callbacks run outside the lock, so they may unsubscribe
/// (themselves or others) while being notified.
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, Callback)>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.callbacks.push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.callbacks.len();
        inner.callbacks.retain(|(existing, _)| *existing != id);
        inner.callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every callback registered at the time of the call.
    ///
    /// A panicking callback is logged and skipped; the others still run.
    pub fn notify(&self, snapshot: &ConnectionSnapshot) {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock();
            inner
                .callbacks
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        }; // Lock released here

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                tracing::error!("Subscriber callback panicked while handling {}", snapshot.state);
            }
        }
    }

    pub fn clear(&self) {
        self.inner.lock().callbacks.clear();
    }
}

/// Handle returned by `subscribe`; unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, registry: &Arc<SubscriberRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribes now. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }

    /// Keeps the callback registered for the lifetime of the client
    pub fn detach(self) -> SubscriptionId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_notify_reaches_all_subscribers() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.notify(&ConnectionSnapshot::default());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_others() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));

        registry.subscribe(|_| panic!("subscriber bug"));
        {
            let hits = Arc::clone(&hits);
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.notify(&ConnectionSnapshot::default());
        registry.notify(&ConnectionSnapshot::default());

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let registry = Arc::new(SubscriberRegistry::new());
        let hits = Arc::new(AtomicU32::new(0));
        let own_id = Arc::new(Mutex::new(None::<SubscriptionId>));

        let id = {
            let registry_for_cb = Arc::downgrade(&registry);
            let hits = Arc::clone(&hits);
            let own_id = Arc::clone(&own_id);
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let (Some(registry), Some(id)) = (registry_for_cb.upgrade(), *own_id.lock()) {
                    registry.unsubscribe(id);
                }
            })
        };
        *own_id.lock() = Some(id);

        registry.notify(&ConnectionSnapshot::default());
        registry.notify(&ConnectionSnapshot::default());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let registry = Arc::new(SubscriberRegistry::new());
        let subscription = Subscription::new(registry.subscribe(|_| {}), &registry);
        assert_eq!(registry.len(), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(registry.len(), 0);

        let dropped = Subscription::new(registry.subscribe(|_| {}), &registry);
        drop(dropped);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_unknown_id_is_noop() {
        let registry = Arc::new(SubscriberRegistry::new());
        let id = registry.subscribe(|_| {});
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let registry = Arc::new(SubscriberRegistry::new());
        let subscription = Subscription::new(registry.subscribe(|_| {}), &registry);
        drop(registry);
        subscription.unsubscribe();
    }
}
