//! In-memory keyed event bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::bus::{EventBus, Handler, Unsubscribe};

type SharedHandler<M> = Arc<dyn Fn(&M) + Send + Sync + 'static>;

struct Inner<M> {
    subscribers: Mutex<HashMap<String, Vec<(u64, SharedHandler<M>)>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<M> Inner<M> {
    fn remove(&self, key: &str, id: u64) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        if let Some(handlers) = subs.get_mut(key) {
            handlers.retain(|(sub_id, _)| *sub_id != id);
            // Drop empty keys so abandoned correlation ids do not pile up.
            if handlers.is_empty() {
                subs.remove(key);
            }
        }
        debug!(key, subscription = id, "unsubscribed");
    }
}

/// In-memory pub/sub bus.
///
/// - No IO
/// - Best-effort fan-out, single process only
/// - Handlers run on the publisher's task; keep them short (e.g. a channel send)
pub struct InMemoryEventBus<M> {
    inner: Arc<Inner<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear the bus down: drop every subscriber and ignore later publishes.
    ///
    /// Outstanding [`Unsubscribe`] handles stay valid and become no-ops.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut subs) = self.inner.subscribers.lock() {
            subs.clear();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of keys with at least one live subscriber.
    pub fn active_keys(&self) -> usize {
        self.inner.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("active_keys", &self.active_keys())
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Send + 'static,
{
    fn publish(&self, key: &str, message: M) -> usize {
        if self.is_shut_down() {
            return 0;
        }

        // Snapshot handlers so none run under the lock (a handler may unsubscribe).
        let handlers: Vec<SharedHandler<M>> = match self.inner.subscribers.lock() {
            Ok(subs) => subs
                .get(key)
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default(),
            Err(_) => {
                warn!(key, "event bus lock poisoned; dropping publish");
                return 0;
            }
        };

        for handler in &handlers {
            handler(&message);
        }

        debug!(key, delivered = handlers.len(), "published");
        handlers.len()
    }

    fn subscribe(&self, key: &str, handler: Handler<M>) -> Unsubscribe {
        if self.is_shut_down() {
            return Unsubscribe::noop();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.subscribers.lock() {
            Ok(mut subs) => {
                subs.entry(key.to_string())
                    .or_default()
                    .push((id, Arc::from(handler)));
            }
            Err(_) => {
                warn!(key, "event bus lock poisoned; subscription ignored");
                return Unsubscribe::noop();
            }
        }
        debug!(key, subscription = id, "subscribed");

        let weak: Weak<Inner<M>> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&key, id);
            }
        })
    }

    fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .map(|subs| subs.get(key).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::bus::subscribe_channel;

    fn recorder() -> (Arc<Mutex<Vec<serde_json::Value>>>, Handler<serde_json::Value>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Handler<serde_json::Value> =
            Box::new(move |m: &serde_json::Value| sink.lock().unwrap().push(m.clone()));
        (seen, handler)
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus: InMemoryEventBus<serde_json::Value> = InMemoryEventBus::new();
        assert_eq!(bus.publish("abc123", json!({"status": "complete"})), 0);
    }

    #[test]
    fn subscriber_receives_once_and_stops_after_unsubscribe() {
        let bus = InMemoryEventBus::new();
        let (seen, handler) = recorder();

        let unsub = bus.subscribe("abc123", handler);
        assert_eq!(bus.publish("abc123", json!({"status": "complete"})), 1);
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"status": "complete"})]);

        unsub.unsubscribe();
        assert_eq!(bus.publish("abc123", json!({"status": "complete"})), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn keys_are_isolated() {
        let bus = InMemoryEventBus::new();
        let (seen, handler) = recorder();
        let _unsub = bus.subscribe("a", handler);

        bus.publish("b", json!(1));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_handle_releases_key() {
        let bus: InMemoryEventBus<serde_json::Value> = InMemoryEventBus::new();
        {
            let (_seen, handler) = recorder();
            let _unsub = bus.subscribe("k", handler);
            assert_eq!(bus.subscriber_count("k"), 1);
        }
        assert_eq!(bus.subscriber_count("k"), 0);
        assert_eq!(bus.active_keys(), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_publish() {
        let bus: Arc<InMemoryEventBus<u32>> = Arc::new(InMemoryEventBus::new());
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

        let slot_in_handler = slot.clone();
        let unsub = bus.subscribe(
            "k",
            Box::new(move |_m: &u32| {
                if let Some(u) = slot_in_handler.lock().unwrap().take() {
                    u.unsubscribe();
                }
            }),
        );
        *slot.lock().unwrap() = Some(unsub);

        assert_eq!(bus.publish("k", 1), 1);
        assert_eq!(bus.publish("k", 2), 0);
    }

    #[test]
    fn shutdown_drops_subscribers() {
        let bus = InMemoryEventBus::new();
        let (seen, handler) = recorder();
        let unsub = bus.subscribe("k", handler);

        bus.shutdown();
        assert_eq!(bus.publish("k", json!(1)), 0);
        assert!(seen.lock().unwrap().is_empty());

        unsub.unsubscribe();
        let (_seen, handler) = recorder();
        let late = bus.subscribe("k", handler);
        assert_eq!(bus.subscriber_count("k"), 0);
        drop(late);
    }

    #[tokio::test]
    async fn channel_bridge_forwards_messages() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let (unsub, mut rx) = subscribe_channel(&bus, "k");

        bus.publish("k", 7);
        assert_eq!(rx.recv().await, Some(7));

        drop(unsub);
        assert_eq!(bus.subscriber_count("k"), 0);
    }
}
