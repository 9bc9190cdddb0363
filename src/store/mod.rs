//! Coordination store backends
//!
//! Both backends implement [`CoordinationStore`]; the backend is chosen once at
//! construction time from a [`StoreType`].

use crate::cli::StoreType;
use crate::config::AuthorizerConfig;
use crate::core::traits::CoordinationStore;
use crate::types::PaymentError;
use std::sync::Arc;

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// Construct the selected coordination store
///
/// # Arguments
///
/// * `store_type` - Backend to use
/// * `config` - Buffer sizes, sweep interval and Redis URL
///
/// # Returns
///
/// * `Ok(Arc<dyn CoordinationStore>)` - A ready store
/// * `Err(PaymentError::Store)` - The Redis connection could not be established
pub async fn connect(
    store_type: StoreType,
    config: &AuthorizerConfig,
) -> Result<Arc<dyn CoordinationStore>, PaymentError> {
    match store_type {
        StoreType::Memory => Ok(InMemoryStore::start(config.event_buffer, config.sweep_interval())),
        StoreType::Redis => {
            let store = RedisStore::connect(&config.redis_url, config.event_buffer).await?;
            store.health_check().await?;
            Ok(Arc::new(store))
        }
    }
}
