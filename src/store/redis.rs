//! Redis coordination store
//!
//! Shares locks and the merchant cache across authorizer instances. Commands go
//! through a `ConnectionManager`; expiry notifications come from keyspace events
//! on a dedicated pub/sub connection.
//!
//! Releasing a lock with a zero TTL deletes the key, which Redis reports as a
//! `del` event rather than `expired`, so both channels are subscribed.

use crate::core::traits::CoordinationStore;
use crate::types::PaymentError;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Redis-backed coordination store
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
    event_buffer: usize,
}

impl RedisStore {
    /// Connect and enable keyspace notifications
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL, e.g. `redis://localhost:6379/0`
    /// * `event_buffer` - Capacity of the expiry stream handed to the event bus
    pub async fn connect(url: &str, event_buffer: usize) -> Result<Self, PaymentError> {
        info!(url = %url, "Connecting to Redis");

        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;

        let store = Self {
            client,
            manager,
            event_buffer: event_buffer.max(1),
        };
        store.enable_keyspace_events().await;

        info!("Redis connection established");
        Ok(store)
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), PaymentError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Managed servers often forbid CONFIG; notifications must then be enabled
    /// server-side, so failure only warns.
    async fn enable_keyspace_events(&self) {
        let mut conn = self.manager.clone();
        let result = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Egx")
            .query_async::<()>(&mut conn)
            .await;

        if let Err(e) = result {
            warn!(error = %e, "could not enable keyspace events, expect lock waiters to time out");
        }
    }

    fn db(&self) -> i64 {
        self.client.get_connection_info().redis.db
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, PaymentError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), PaymentError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PaymentError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PaymentError> {
        let mut conn = self.manager.clone();
        let existed: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(existed == 1)
    }

    async fn expired_keys(&self) -> Result<mpsc::Receiver<String>, PaymentError> {
        let db = self.db();
        let channels = [
            format!("__keyevent@{db}__:expired"),
            format!("__keyevent@{db}__:del"),
        ];

        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in &channels {
            pubsub.subscribe(channel).await?;
        }
        debug!(?channels, "subscribed to keyspace events");

        let (sender, receiver) = mpsc::channel(self.event_buffer);
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                match message.get_payload::<String>() {
                    Ok(key) => {
                        if sender.send(key).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed keyspace event"),
                }
            }
            warn!("Redis keyspace subscription ended");
        });

        Ok(receiver)
    }
}
