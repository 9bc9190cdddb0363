//! Expiry event bus
//!
//! Routes the coordination store's expiry stream to the tasks waiting on a given
//! key. A single dispatcher task drains the store stream; waiters subscribe to the
//! key they care about and receive the key name on a small bounded queue when it
//! expires or is released.
//!
//! # Architecture
//!
//! ```text
//! CoordinationStore::expired_keys()
//!     └── dispatcher task
//!             └── DashMap<key, Vec<Listener>>  (fan-out per key)
//!                     ├── Subscription (waiter 1)
//!                     └── Subscription (waiter 2)
//! ```
//!
//! Notifications are hints only. A waiter that is woken still has to win the
//! store's atomic set-if-absent; a full queue means a wake-up is already pending,
//! so dropping the extra notification loses nothing.

use crate::core::traits::CoordinationStore;
use crate::types::PaymentError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
struct Listener {
    id: u64,
    sender: mpsc::Sender<String>,
}

#[derive(Debug)]
struct BusInner {
    listeners: DashMap<String, Vec<Listener>>,
    next_id: AtomicU64,
    listener_buffer: usize,
}

impl BusInner {
    fn unsubscribe(&self, key: &str, id: u64) {
        let now_empty = match self.listeners.get_mut(key) {
            Some(mut entry) => {
                entry.retain(|listener| listener.id != id);
                entry.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.listeners.remove_if(key, |_, listeners| listeners.is_empty());
        }
    }
}

/// Keyed fan-out of expiry notifications
///
/// Cloning the bus is cheap and every clone shares the same subscriptions.
#[derive(Debug, Clone)]
pub struct ExpiryEventBus {
    inner: Arc<BusInner>,
}

impl ExpiryEventBus {
    /// Create a bus without a dispatcher
    ///
    /// # Arguments
    ///
    /// * `listener_buffer` - Queue capacity of each subscription (at least 1)
    pub fn new(listener_buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(0),
                listener_buffer: listener_buffer.max(1),
            }),
        }
    }

    /// Open the store's expiry stream and start dispatching it
    pub async fn start(
        store: &dyn CoordinationStore,
        listener_buffer: usize,
    ) -> Result<Self, PaymentError> {
        let events = store.expired_keys().await?;
        let bus = Self::new(listener_buffer);
        bus.spawn_dispatcher(events);
        Ok(bus)
    }

    /// Spawn the single task draining `events` into the subscriptions
    ///
    /// The task ends when the stream closes.
    pub fn spawn_dispatcher(&self, mut events: mpsc::Receiver<String>) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(key) = events.recv().await {
                let notified = bus.dispatch(&key);
                if notified > 0 {
                    debug!(key = %key, notified, "dispatched expiry notification");
                }
            }
            warn!("expiry event stream closed, lock waiters will rely on their deadline");
        })
    }

    /// Register interest in `key`
    ///
    /// The subscription is removed when the returned value is dropped.
    pub fn subscribe(&self, key: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.listener_buffer);

        self.inner
            .listeners
            .entry(key.to_string())
            .or_default()
            .push(Listener { id, sender });

        Subscription {
            key: key.to_string(),
            id,
            receiver,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Notify every subscriber of `key`
    ///
    /// # Returns
    ///
    /// The number of subscribers that were notified or already had a pending
    /// notification.
    pub fn dispatch(&self, key: &str) -> usize {
        let senders: Vec<mpsc::Sender<String>> = match self.inner.listeners.get(key) {
            Some(entry) => entry.iter().map(|listener| listener.sender.clone()).collect(),
            None => return 0,
        };

        senders
            .iter()
            .filter(|sender| match sender.try_send(key.to_string()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            })
            .count()
    }

    /// Number of live subscriptions for `key`
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .listeners
            .get(key)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

/// Interest in one key's expiry
///
/// Dropping the subscription unsubscribes it, so waiters cannot leak listeners on
/// any exit path.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    id: u64,
    receiver: mpsc::Receiver<String>,
    bus: Arc<BusInner>,
}

impl Subscription {
    /// Key this subscription listens to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next notification; `None` if the bus dropped the listener
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatch_reaches_subscriber() {
        let bus = ExpiryEventBus::new(1);
        let mut subscription = bus.subscribe("lock:account:1");

        assert_eq!(bus.dispatch("lock:account:1"), 1);
        assert_eq!(subscription.recv().await.as_deref(), Some("lock:account:1"));
    }

    #[tokio::test]
    async fn test_dispatch_ignores_other_keys() {
        let bus = ExpiryEventBus::new(1);
        let mut subscription = bus.subscribe("lock:account:1");

        assert_eq!(bus.dispatch("merchant:PADARIA"), 0);
        let received = tokio::time::timeout(Duration::from_millis(20), subscription.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_fan_out_to_every_waiter_on_key() {
        let bus = ExpiryEventBus::new(1);
        let mut first = bus.subscribe("lock:account:1");
        let mut second = bus.subscribe("lock:account:1");

        assert_eq!(bus.dispatch("lock:account:1"), 2);
        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = ExpiryEventBus::new(1);
        let first = bus.subscribe("lock:account:1");
        let second = bus.subscribe("lock:account:1");
        assert_eq!(bus.subscriber_count("lock:account:1"), 2);

        drop(first);
        assert_eq!(bus.subscriber_count("lock:account:1"), 1);

        drop(second);
        assert_eq!(bus.subscriber_count("lock:account:1"), 0);
        assert_eq!(bus.dispatch("lock:account:1"), 0);
    }

    #[tokio::test]
    async fn test_full_queue_keeps_pending_notification() {
        let bus = ExpiryEventBus::new(1);
        let mut subscription = bus.subscribe("k");

        assert_eq!(bus.dispatch("k"), 1);
        assert_eq!(bus.dispatch("k"), 1);
        assert!(subscription.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_dispatcher_drains_stream() {
        let bus = ExpiryEventBus::new(1);
        let mut subscription = bus.subscribe("lock:account:9");
        let (sender, receiver) = mpsc::channel(8);
        let handle = bus.spawn_dispatcher(receiver);

        sender.send("lock:account:9".to_string()).await.unwrap();
        assert_eq!(subscription.recv().await.as_deref(), Some("lock:account:9"));

        drop(sender);
        handle.await.unwrap();
    }
}
