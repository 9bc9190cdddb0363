//! Distributed lock manager
//!
//! Serializes processing per account across authorizer instances using an
//! expiring key in the shared coordination store. The existence of the key *is*
//! the lock; its TTL bounds how long a crashed holder can block the account.
//!
//! # Acquisition
//!
//! 1. Fast path: atomic set-if-absent of the lock key.
//! 2. Slow path: subscribe to the key's expiry notifications, then wait for
//!    whichever comes first:
//!    - a notification: retry the set-if-absent exactly once;
//!    - the request deadline: fail with `LockTimeout`;
//!    - cancellation: fail with `Cancelled`.
//!
//! Only the store's atomic write decides who holds the lock. Notifications merely
//! save waiters from polling, so several woken waiters race and all but one get
//! `LockContention`.

use crate::core::context::RequestContext;
use crate::core::event_bus::ExpiryEventBus;
use crate::core::traits::CoordinationStore;
use crate::types::PaymentError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock key of an account
pub fn account_lock_key(account_uid: Uuid) -> String {
    format!("lock:account:{account_uid}")
}

/// Identity of a lock holder, stored as the lock value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Transaction holding the lock
    pub transaction_uid: Uuid,
    /// Wall-clock acquisition time, milliseconds since the epoch
    pub acquired_at_ms: i64,
}

impl LockHolder {
    /// Holder for the given transaction, stamped now
    pub fn new(transaction_uid: Uuid) -> Self {
        Self {
            transaction_uid,
            acquired_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Encode as `<transaction_uid>:<acquired_at_ms>`
    pub fn encode(&self) -> String {
        format!("{}:{}", self.transaction_uid, self.acquired_at_ms)
    }

    /// Decode a stored lock value; `None` if it was not written by this manager
    pub fn decode(value: &str) -> Option<Self> {
        let (uid, acquired_at_ms) = value.rsplit_once(':')?;
        Some(Self {
            transaction_uid: Uuid::parse_str(uid).ok()?,
            acquired_at_ms: acquired_at_ms.parse().ok()?,
        })
    }

    /// How long the lock has been held, never negative
    pub fn held_for_ms(&self) -> i64 {
        (chrono::Utc::now().timestamp_millis() - self.acquired_at_ms).max(0)
    }
}

/// Lock manager over a shared coordination store
#[derive(Clone)]
pub struct DistributedLockManager {
    store: Arc<dyn CoordinationStore>,
    events: ExpiryEventBus,
    ttl: Duration,
}

impl DistributedLockManager {
    /// Create a lock manager
    ///
    /// # Arguments
    ///
    /// * `store` - Coordination store holding the lock keys
    /// * `events` - Event bus fed by the same store's expiry stream
    /// * `ttl` - Default lock TTL; must outlive the request deadline
    pub fn new(store: Arc<dyn CoordinationStore>, events: ExpiryEventBus, ttl: Duration) -> Self {
        Self { store, events, ttl }
    }

    /// Acquire the lock for `key` on behalf of the request in `ctx`
    ///
    /// # Returns
    ///
    /// * `Ok(LockGuard)` - The lock is held until the guard is released
    /// * `Err(PaymentError::LockTimeout)` - Still held when the deadline passed
    /// * `Err(PaymentError::LockContention)` - Another waiter won the single retry
    /// * `Err(PaymentError::Cancelled)` - The request was cancelled while waiting
    /// * `Err(PaymentError::Store)` - The store failed
    pub async fn acquire(&self, ctx: &RequestContext, key: &str) -> Result<LockGuard, PaymentError> {
        let value = LockHolder::new(ctx.transaction_uid).encode();

        if self.try_write(ctx, key, &value).await? {
            debug!(key = %key, "lock acquired");
            return Ok(self.guard(key));
        }

        // Subscribe before looking again so a release in between is not missed
        let mut subscription = self.events.subscribe(key);

        match ctx.guard("lock inspection", self.store.get(key)).await? {
            None => {
                debug!(key = %key, "lock released before subscribing, retrying");
                return self.retry_once(ctx, key, &value).await;
            }
            Some(current) => match LockHolder::decode(&current) {
                Some(holder) => debug!(
                    key = %key,
                    holder = %holder.transaction_uid,
                    held_for_ms = holder.held_for_ms(),
                    "lock held, waiting for release"
                ),
                None => debug!(key = %key, "lock held by unknown holder, waiting for release"),
            },
        }

        let waiting_since = Instant::now();

        tokio::select! {
            notification = subscription.recv() => match notification {
                Some(_) => {
                    debug!(key = %key, waited_ms = waiting_since.elapsed().as_millis() as u64, "lock released, retrying");
                    self.retry_once(ctx, key, &value).await
                }
                None => Err(PaymentError::store("expiry subscription closed")),
            },
            _ = tokio::time::sleep_until(ctx.deadline()) => {
                Err(PaymentError::lock_timeout(key, waiting_since.elapsed().as_millis() as u64))
            }
            _ = ctx.cancellation().cancelled() => Err(PaymentError::cancelled("lock acquisition")),
        }
    }

    /// Release the lock for `key`
    ///
    /// Releasing an absent or already expired lock is not an error.
    pub async fn release(&self, key: &str) -> Result<(), PaymentError> {
        release_key(self.store.as_ref(), key).await
    }

    /// Attempt the atomic lock write, bounded by the request deadline
    ///
    /// The write runs in its own task. If the deadline or cancellation wins, the
    /// task is left to finish and a lock it managed to write is released, so a
    /// request that gave up never leaves the account locked until the TTL.
    async fn try_write(&self, ctx: &RequestContext, key: &str, value: &str) -> Result<bool, PaymentError> {
        const OPERATION: &str = "lock acquisition";

        if ctx.cancellation().is_cancelled() {
            return Err(PaymentError::cancelled(OPERATION));
        }
        if Instant::now() >= ctx.deadline() {
            return Err(PaymentError::deadline_exceeded(OPERATION));
        }

        let store = Arc::clone(&self.store);
        let (owned_key, owned_value, ttl) = (key.to_string(), value.to_string(), self.ttl);
        let mut write =
            tokio::spawn(async move { store.set_if_absent(&owned_key, &owned_value, ttl).await });

        let abandoned = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => PaymentError::cancelled(OPERATION),
            _ = tokio::time::sleep_until(ctx.deadline()) => PaymentError::deadline_exceeded(OPERATION),
            joined = &mut write => {
                return joined.unwrap_or_else(|e| Err(PaymentError::store(format!("lock write task failed: {e}"))));
            }
        };

        let store = Arc::clone(&self.store);
        let key = key.to_string();
        tokio::spawn(async move {
            if let Ok(Ok(true)) = write.await {
                debug!(key = %key, "lock written after its request gave up, releasing");
                if let Err(e) = release_key(store.as_ref(), &key).await {
                    warn!(key = %key, error = %e, "orphaned lock release failed, lock will expire by TTL");
                }
            }
        });

        Err(abandoned)
    }

    async fn retry_once(&self, ctx: &RequestContext, key: &str, value: &str) -> Result<LockGuard, PaymentError> {
        if self.try_write(ctx, key, value).await? {
            debug!(key = %key, "lock acquired after wait");
            Ok(self.guard(key))
        } else {
            Err(PaymentError::lock_contention(key))
        }
    }

    fn guard(&self, key: &str) -> LockGuard {
        LockGuard {
            key: key.to_string(),
            store: Arc::clone(&self.store),
            released: false,
        }
    }
}

async fn release_key(store: &dyn CoordinationStore, key: &str) -> Result<(), PaymentError> {
    if !store.expire(key, Duration::ZERO).await? {
        debug!(key = %key, "lock was already gone at release");
    }
    Ok(())
}

/// A held account lock
///
/// Release it explicitly with [`LockGuard::release`]. A guard dropped while still
/// held (for instance because the request future was dropped) releases the lock
/// in a background task; the TTL covers the case where even that fails.
pub struct LockGuard {
    key: String,
    store: Arc<dyn CoordinationStore>,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// Key of the held lock
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<(), PaymentError> {
        self.released = true;
        release_key(self.store.as_ref(), &self.key).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(e) = release_key(store.as_ref(), &key).await {
                        warn!(key = %key, error = %e, "background lock release failed, lock will expire by TTL");
                    }
                });
            }
            Err(_) => warn!(key = %key, "lock guard dropped outside a runtime, lock will expire by TTL"),
        }
    }
}
