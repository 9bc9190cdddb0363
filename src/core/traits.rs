//! Core traits for repositories and the coordination store
//!
//! This module defines the contracts the authorizer consumes. Implementations are
//! chosen at construction time (in-memory or Redis for the store, in-memory
//! repositories seeded from CSV for the binary) and passed in as trait objects.

use crate::types::{Account, Merchant, PaymentError, TransactionRecord};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Account persistence
///
/// `save_transactions` must be atomic across the whole set: either every record is
/// stored and every debit applied to the balance, or nothing changes.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Load an account and its balance by external UID
    ///
    /// Returns `PaymentError::AccountNotFound` when no such account exists.
    async fn find_by_uid(&self, uid: Uuid) -> Result<Account, PaymentError>;

    /// Persist the records of one authorized transaction and debit the balance
    async fn save_transactions(&self, records: &[TransactionRecord]) -> Result<(), PaymentError>;
}

/// Merchant lookup (merchant name to MCC)
#[async_trait]
pub trait MerchantRepository: Send + Sync {
    /// Find a merchant by name; `Ok(None)` when the merchant is unknown
    async fn find_by_name(&self, name: &str) -> Result<Option<Merchant>, PaymentError>;
}

/// Shared in-memory coordination store
///
/// Backs both the distributed lock (expiring keys + expiry notifications) and the
/// merchant cache. Every operation on a single key is atomic.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write `value` under `key` with a TTL only if the key does not exist
    ///
    /// Returns `true` if the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, PaymentError>;

    /// Write `value` under `key` with a TTL, replacing any previous value
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), PaymentError>;

    /// Read a key; `Ok(None)` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, PaymentError>;

    /// Change the TTL of a key; a zero TTL expires it immediately
    ///
    /// Returns `true` if the key existed. Expiring an absent key is not an error.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PaymentError>;

    /// Stream of key names that expired or were expired explicitly
    ///
    /// Each call opens a new stream; the authorizer drains a single one through the
    /// expiry event bus.
    async fn expired_keys(&self) -> Result<mpsc::Receiver<String>, PaymentError>;
}
