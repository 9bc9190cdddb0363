//! In-process coordination store
//!
//! A single-process stand-in for the shared coordination store: expiring string
//! keys with atomic set-if-absent, plus an expiry stream. It backs the tests and
//! the default CLI mode, where every "instance" lives in the same process.
//!
//! # Expiry
//!
//! TTLs run on the tokio clock. Expired keys are removed lazily when touched and
//! periodically by a sweeper task; every removal, and every explicit zero-TTL
//! expire, is broadcast to the expiry stream.

use crate::core::traits::CoordinationStore;
use crate::types::PaymentError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    /// A zero TTL stores the value without expiry
    fn new(value: &str, ttl: Duration, now: Instant) -> Self {
        Self {
            value: value.to_string(),
            expires_at: (!ttl.is_zero()).then(|| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// DashMap-backed coordination store with expiry notifications
#[derive(Debug)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
    expired: broadcast::Sender<String>,
    event_buffer: usize,
}

impl InMemoryStore {
    /// Create a store without a sweeper; expiry is only observed lazily
    ///
    /// # Arguments
    ///
    /// * `event_buffer` - Capacity of the expiry broadcast and of each stream
    pub fn new(event_buffer: usize) -> Self {
        let event_buffer = event_buffer.max(1);
        let (expired, _) = broadcast::channel(event_buffer);
        Self {
            entries: DashMap::new(),
            expired,
            event_buffer,
        }
    }

    /// Create a shared store and spawn its sweeper task
    ///
    /// The sweeper holds a weak reference and stops once the store is dropped.
    pub fn start(event_buffer: usize, sweep_interval: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new(event_buffer));
        let weak: Weak<Self> = Arc::downgrade(&store);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(store) => {
                        store.sweep();
                    }
                    None => break,
                }
            }
        });

        store
    }

    /// Remove every expired key and notify the expiry stream
    ///
    /// # Returns
    ///
    /// The number of keys removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| self.remove_expired(key, now))
            .count()
    }

    /// Number of stored keys, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_expired(&self, key: &str, now: Instant) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, value| value.is_expired(now))
            .is_some();
        if removed {
            self.notify_expired(key);
        }
        removed
    }

    fn notify_expired(&self, key: &str) {
        debug!(key = %key, "key expired");
        // No receivers is fine: nobody is waiting
        let _ = self.expired.send(key.to_string());
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, PaymentError> {
        let now = Instant::now();
        let mut displaced = false;

        let written = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredValue::new(value, ttl, now));
                    displaced = true;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl, now));
                true
            }
        };

        if displaced {
            self.notify_expired(key);
        }

        Ok(written)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), PaymentError> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl, Instant::now()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PaymentError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };

        self.remove_expired(key, now);
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PaymentError> {
        let now = Instant::now();

        if ttl.is_zero() {
            return Ok(match self.entries.remove(key) {
                Some((_, previous)) => {
                    self.notify_expired(key);
                    !previous.is_expired(now)
                }
                None => false,
            });
        }

        Ok(match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        })
    }

    async fn expired_keys(&self) -> Result<mpsc::Receiver<String>, PaymentError> {
        let mut events = self.expired.subscribe();
        let (sender, receiver) = mpsc::channel(self.event_buffer);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(key) => {
                        if sender.send(key).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "expiry stream lagged, some notifications were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(receiver)
    }
}
