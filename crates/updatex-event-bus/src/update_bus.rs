//! Update Event Bus
//!
//! The orchestrator publishes every observable step of an update cycle
//! here; UI layers and the CLI subscribe.

use tokio::sync::mpsc;
use updatex_types::UpdateEvent;

use crate::core::{EventBusContainer, EventBusStats, SubscriptionId};

/// Specialized container for update events
#[derive(Clone)]
pub struct UpdateEventBusContainer {
    inner: EventBusContainer<UpdateEvent>,
}

impl UpdateEventBusContainer {
    pub fn new() -> Self {
        Self {
            inner: EventBusContainer::new(),
        }
    }

    /// Subscribe to all update events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe(move |event| {
            callback(event);
            true
        })
    }

    /// Subscribe to a single event name, e.g. `"download-progress"`
    pub fn subscribe_named<F>(&self, name: &'static str, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_with_filter(
            move |event| {
                callback(event);
                true
            },
            move |event| event.name() == name,
        )
    }

    /// Subscribe to `error` events only, receiving the message
    pub fn subscribe_errors<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.subscribe_with_filter(
            move |event| {
                if let UpdateEvent::Error(message) = event {
                    callback(message);
                }
                true
            },
            UpdateEvent::is_error,
        )
    }

    /// Subscribe to the next event only
    pub fn subscribe_once<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_once(callback)
    }

    /// Receive events through a channel; ends when the receiver is dropped
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<UpdateEvent>) {
        self.inner.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn publish(&self, event: UpdateEvent) {
        match &event {
            UpdateEvent::DownloadProgress(percent) => {
                log::trace!("[UpdateEventBus] download-progress {}%", percent)
            }
            other => log::debug!("[UpdateEventBus] Publishing {}", other.name()),
        }
        self.inner.publish(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    pub fn stats(&self) -> EventBusStats {
        self.inner.stats()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Underlying generic bus
    pub fn inner(&self) -> &EventBusContainer<UpdateEvent> {
        &self.inner
    }
}

impl Default for UpdateEventBusContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use updatex_types::UpdateMetadata;

    #[test]
    fn test_subscribe_named_filters_by_event_name() {
        let bus = UpdateEventBusContainer::new();
        let progress = Arc::new(Mutex::new(Vec::new()));

        let progress_clone = progress.clone();
        bus.subscribe_named("download-progress", move |event| {
            if let UpdateEvent::DownloadProgress(p) = event {
                progress_clone.lock().unwrap().push(*p);
            }
        });

        bus.publish(UpdateEvent::UpdateDownloading(UpdateMetadata::new("2.0.0")));
        bus.publish(UpdateEvent::DownloadProgress(10));
        bus.publish(UpdateEvent::UpdateNotAvailable);
        bus.publish(UpdateEvent::DownloadProgress(55));

        assert_eq!(*progress.lock().unwrap(), vec![10, 55]);
    }

    #[test]
    fn test_subscribe_errors() {
        let bus = UpdateEventBusContainer::new();
        let messages = Arc::new(Mutex::new(Vec::new()));

        let messages_clone = messages.clone();
        bus.subscribe_errors(move |message| {
            messages_clone.lock().unwrap().push(message.to_string());
        });

        bus.publish(UpdateEvent::UpdateNotAvailable);
        bus.publish(UpdateEvent::Error("network down".to_string()));

        assert_eq!(*messages.lock().unwrap(), vec!["network down".to_string()]);
    }

    #[test]
    fn test_subscribe_all() {
        let bus = UpdateEventBusContainer::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let id = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(UpdateEvent::UpdateDisabled);
        assert!(bus.unsubscribe(id));
        bus.publish(UpdateEvent::UpdateDisabled);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().events_published, 2);
    }
}
