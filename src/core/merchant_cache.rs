//! Cache-aside merchant lookup
//!
//! Resolves merchant names through the shared coordination store before falling
//! back to the merchant repository. Found merchants are cached with a TTL; unknown
//! merchants and lookup failures are never cached. Entries are not invalidated on
//! writes, so staleness is bounded by the TTL alone.

use crate::core::traits::{CoordinationStore, MerchantRepository};
use crate::types::{Merchant, PaymentError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache key of a merchant name
pub fn merchant_cache_key(name: &str) -> String {
    format!("merchant:{name}")
}

/// Merchant repository decorated with a cache-aside layer
#[derive(Clone)]
pub struct CachedMerchantRepository {
    backing: Arc<dyn MerchantRepository>,
    cache: Arc<dyn CoordinationStore>,
    ttl: Duration,
}

impl CachedMerchantRepository {
    /// Wrap `backing` with a cache held in `cache`
    pub fn new(backing: Arc<dyn MerchantRepository>, cache: Arc<dyn CoordinationStore>, ttl: Duration) -> Self {
        Self { backing, cache, ttl }
    }

    /// Resolve a merchant by name
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Merchant))` - From the cache, or from the backing lookup (then cached)
    /// * `Ok(None)` - The merchant is unknown; nothing is cached
    /// * `Err(PaymentError)` - The backing lookup failed; nothing is cached
    pub async fn resolve(&self, name: &str) -> Result<Option<Merchant>, PaymentError> {
        let key = merchant_cache_key(name);

        match self.cache.get(&key).await {
            Ok(Some(mcc)) => {
                debug!(merchant = %name, "merchant cache hit");
                return Ok(Some(Merchant::new(name, mcc)));
            }
            Ok(None) => debug!(merchant = %name, "merchant cache miss"),
            Err(e) => warn!(merchant = %name, error = %e, "merchant cache read failed, using repository"),
        }

        let merchant = self.backing.find_by_name(name).await?;

        if let Some(merchant) = &merchant {
            if let Err(e) = self.cache.set(&key, &merchant.mcc, self.ttl).await {
                warn!(merchant = %name, error = %e, "merchant cache write failed");
            }
        }

        Ok(merchant)
    }
}

#[async_trait]
impl MerchantRepository for CachedMerchantRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Merchant>, PaymentError> {
        self.resolve(name).await
    }
}
