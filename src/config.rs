//! Authorizer configuration
//!
//! Timeouts, TTLs and buffer sizes shared by the coordinator, the lock manager, the
//! merchant cache and the store backends. Values come from `AUTHORIZER_*`
//! environment variables (a `.env` file is honoured by the binary) and may be
//! overridden by CLI flags.

use crate::types::PaymentError;
use serde::Deserialize;
use std::time::Duration;

/// Runtime configuration of the authorizer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizerConfig {
    /// Per-request deadline covering the lock wait and every downstream call
    #[serde(default = "default_timeout_sla_ms")]
    pub timeout_sla_ms: u64,

    /// TTL of an account lock; bounds how long a crashed holder blocks the account
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// TTL of a cached merchant entry
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Capacity of the store's expiry stream
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Queue capacity of each lock waiter's subscription
    #[serde(default = "default_listener_buffer")]
    pub listener_buffer: usize,

    /// Sweep interval of the in-memory store
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Redis connection URL (Redis store only)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

fn default_timeout_sla_ms() -> u64 {
    1000
}

fn default_lock_ttl_ms() -> u64 {
    2000
}

fn default_cache_ttl_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_event_buffer() -> usize {
    1024
}

fn default_listener_buffer() -> usize {
    1
}

fn default_sweep_interval_ms() -> u64 {
    50
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            timeout_sla_ms: default_timeout_sla_ms(),
            lock_ttl_ms: default_lock_ttl_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            event_buffer: default_event_buffer(),
            listener_buffer: default_listener_buffer(),
            sweep_interval_ms: default_sweep_interval_ms(),
            redis_url: default_redis_url(),
        }
    }
}

impl AuthorizerConfig {
    /// Load from the process environment; unset or unparsable values use defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            timeout_sla_ms: number("AUTHORIZER_TIMEOUT_SLA_MS")
                .unwrap_or_else(default_timeout_sla_ms),
            lock_ttl_ms: number("AUTHORIZER_LOCK_TTL_MS").unwrap_or_else(default_lock_ttl_ms),
            cache_ttl_ms: number("AUTHORIZER_CACHE_TTL_MS").unwrap_or_else(default_cache_ttl_ms),
            event_buffer: number("AUTHORIZER_EVENT_BUFFER")
                .map(|n| n as usize)
                .unwrap_or_else(default_event_buffer),
            listener_buffer: number("AUTHORIZER_LISTENER_BUFFER")
                .map(|n| n as usize)
                .unwrap_or_else(default_listener_buffer),
            sweep_interval_ms: number("AUTHORIZER_SWEEP_INTERVAL_MS")
                .unwrap_or_else(default_sweep_interval_ms),
            redis_url: lookup("REDIS_URL").unwrap_or_else(default_redis_url),
        }
    }

    /// Check the configuration is usable
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every value is in range
    /// * `Err(PaymentError::Configuration)` - A zero duration or buffer, or a lock TTL
    ///   shorter than the request deadline
    pub fn validate(&self) -> Result<(), PaymentError> {
        let non_zero = [
            ("timeout_sla_ms", self.timeout_sla_ms),
            ("lock_ttl_ms", self.lock_ttl_ms),
            ("cache_ttl_ms", self.cache_ttl_ms),
            ("event_buffer", self.event_buffer as u64),
            ("listener_buffer", self.listener_buffer as u64),
            ("sweep_interval_ms", self.sweep_interval_ms),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(PaymentError::configuration(format!("{name} must be greater than zero")));
        }

        // A lock must outlive the request holding it
        if self.lock_ttl_ms < self.timeout_sla_ms {
            return Err(PaymentError::configuration(format!(
                "lock_ttl_ms ({}) must not be shorter than timeout_sla_ms ({})",
                self.lock_ttl_ms, self.timeout_sla_ms
            )));
        }

        Ok(())
    }

    pub fn timeout_sla(&self) -> Duration {
        Duration::from_millis(self.timeout_sla_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AuthorizerConfig::default();

        assert_eq!(config.timeout_sla(), Duration::from_secs(1));
        assert_eq!(config.lock_ttl(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(AuthorizerConfig::from_lookup(lookup(&[])), AuthorizerConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AuthorizerConfig::from_lookup(lookup(&[
            ("AUTHORIZER_TIMEOUT_SLA_MS", "250"),
            ("AUTHORIZER_LOCK_TTL_MS", "500"),
            ("AUTHORIZER_LISTENER_BUFFER", "4"),
            ("REDIS_URL", "redis://cache:6379/2"),
        ]));

        assert_eq!(config.timeout_sla_ms, 250);
        assert_eq!(config.lock_ttl_ms, 500);
        assert_eq!(config.listener_buffer, 4);
        assert_eq!(config.redis_url, "redis://cache:6379/2");
        assert_eq!(config.cache_ttl_ms, 300_000);
    }

    #[test]
    fn test_unparsable_value_falls_back_to_default() {
        let config = AuthorizerConfig::from_lookup(lookup(&[("AUTHORIZER_LOCK_TTL_MS", "soon")]));

        assert_eq!(config.lock_ttl_ms, 2000);
    }

    #[rstest]
    #[case::zero_timeout(AuthorizerConfig { timeout_sla_ms: 0, ..AuthorizerConfig::default() })]
    #[case::zero_cache_ttl(AuthorizerConfig { cache_ttl_ms: 0, ..AuthorizerConfig::default() })]
    #[case::zero_listener_buffer(AuthorizerConfig { listener_buffer: 0, ..AuthorizerConfig::default() })]
    #[case::lock_shorter_than_sla(AuthorizerConfig { timeout_sla_ms: 3000, ..AuthorizerConfig::default() })]
    fn test_invalid_configuration_is_rejected(#[case] config: AuthorizerConfig) {
        assert!(matches!(config.validate(), Err(PaymentError::Configuration { .. })));
    }
}
