use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// Handle returned by every subscribe call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Returns `true` to stay subscribed, `false` to unsubscribe
type Callback<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;
type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

struct Subscription<T> {
    id: SubscriptionId,
    callback: Callback<T>,
    filter: Option<Filter<T>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: self.callback.clone(),
            filter: self.filter.clone(),
        }
    }
}

/// Delivery counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventBusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub events_filtered: u64,
    pub active_subscriptions: usize,
}

/// Single-threaded event bus; wrap it in [`EventBusContainer`] to share it
pub struct EventBus<T> {
    subscriptions: Vec<Subscription<T>>,
    next_id: u64,
    stats: EventBusStats,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_id: 1,
            stats: EventBusStats::default(),
        }
    }

    fn add(&mut self, callback: Callback<T>, filter: Option<Filter<T>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            callback,
            filter,
        });
        id
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| sub.id != id);
        self.subscriptions.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe, cloneable handle to an [`EventBus`].
///
/// Callbacks run on the publishing thread, outside the internal lock, so
/// a callback may subscribe, unsubscribe or publish without deadlocking.
pub struct EventBusContainer<T> {
    inner: Arc<Mutex<EventBus<T>>>,
}

impl<T> Clone for EventBusContainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> EventBusContainer<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBus::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EventBus<T>> {
        // A panicking subscriber must not take the bus down with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to every event.
    ///
    /// The callback returns `true` to keep the subscription active, or
    /// `false` to unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.lock().add(Arc::new(callback), None)
    }

    /// Subscribe to events accepted by `filter`
    pub fn subscribe_with_filter<F, P>(&self, callback: F, filter: P) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.lock().add(Arc::new(callback), Some(Arc::new(filter)))
    }

    /// Subscribe to the next event only
    pub fn subscribe_once<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(&T) + Send + Sync + 'static,
    {
        let slot = Mutex::new(Some(callback));
        self.subscribe(move |event| {
            let callback = slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(callback) = callback {
                callback(event);
            }
            false
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(id)
    }

    /// Deliver `event` to every matching subscriber
    pub fn publish(&self, event: T) {
        let snapshot: Vec<Subscription<T>> = {
            let mut bus = self.lock();
            bus.stats.events_published += 1;
            bus.subscriptions.clone()
        };

        let mut delivered = 0;
        let mut filtered = 0;
        let mut finished = Vec::new();
        for sub in &snapshot {
            if let Some(filter) = &sub.filter {
                if !filter(&event) {
                    filtered += 1;
                    continue;
                }
            }
            delivered += 1;
            if !(sub.callback)(&event) {
                finished.push(sub.id);
            }
        }

        let mut bus = self.lock();
        bus.stats.events_delivered += delivered;
        bus.stats.events_filtered += filtered;
        for id in finished {
            log::trace!("[EventBus] Removing finished subscription {}", id);
            bus.remove(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    pub fn stats(&self) -> EventBusStats {
        let bus = self.lock();
        EventBusStats {
            active_subscriptions: bus.len(),
            ..bus.stats
        }
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.lock().subscriptions.clear();
    }
}

impl<T: Clone + Send + 'static> EventBusContainer<T> {
    /// Subscribe through an unbounded channel.
    ///
    /// The subscription ends by itself once the receiver is dropped.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| tx.send(event.clone()).is_ok());
        (id, rx)
    }
}

impl<T: 'static> Default for EventBusContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_and_publish() {
        let bus = EventBusContainer::<u32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        bus.subscribe(move |event| {
            received_clone.lock().unwrap().push(*event);
            true
        });

        bus.publish(1);
        bus.publish(2);

        assert_eq!(*received.lock().unwrap(), vec![1, 2]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_callback_returning_false_unsubscribes() {
        let bus = EventBusContainer::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            false
        });

        bus.publish(1);
        bus.publish(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_filter_and_stats() {
        let bus = EventBusContainer::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        bus.subscribe_with_filter(
            move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                true
            },
            |event| event % 2 == 0,
        );

        for i in 0..5 {
            bus.publish(i);
        }

        assert_eq!(count.load(Ordering::SeqCst), 3);
        let stats = bus.stats();
        assert_eq!(stats.events_published, 5);
        assert_eq!(stats.events_delivered, 3);
        assert_eq!(stats.events_filtered, 2);
        assert_eq!(stats.active_subscriptions, 1);
    }

    #[test]
    fn test_subscribe_once() {
        let bus = EventBusContainer::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        bus.subscribe_once(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(1);
        bus.publish(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_and_clear() {
        let bus = EventBusContainer::<u32>::new();
        let id = bus.subscribe(|_| true);
        bus.subscribe(|_| true);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 1);

        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_reenter_bus() {
        let bus = EventBusContainer::<u32>::new();
        let bus_clone = bus.clone();
        bus.subscribe(move |_| {
            bus_clone.subscribe(|_| true);
            false
        });

        bus.publish(1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_subscription_ends_with_receiver() {
        let bus = EventBusContainer::<u32>::new();
        let (_, mut rx) = bus.subscribe_channel();

        bus.publish(7);
        assert_eq!(rx.recv().await, Some(7));

        drop(rx);
        bus.publish(8);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
