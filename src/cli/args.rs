use crate::config::AuthorizerConfig;
use crate::pipeline::BatchConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Authorize card payment requests against multi-category balances
#[derive(Parser, Debug)]
#[command(name = "card-authorizer")]
#[command(about = "Authorize card payment requests against multi-category balances", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing payment requests
    #[arg(value_name = "INPUT", help = "Path to the payment request CSV file")]
    pub input_file: PathBuf,

    /// Account seed CSV
    #[arg(
        long = "accounts",
        value_name = "PATH",
        help = "CSV of account categories: account,category,priority,amount,mcc_codes,fallback"
    )]
    pub accounts_file: PathBuf,

    /// Merchant seed CSV
    #[arg(
        long = "merchants",
        value_name = "PATH",
        help = "CSV of merchant name to MCC overrides: merchant,mcc"
    )]
    pub merchants_file: Option<PathBuf>,

    /// Coordination store backend
    #[arg(
        long = "store",
        value_name = "STORE",
        default_value = "memory",
        help = "Coordination store: 'memory' for in-process or 'redis' for a shared Redis"
    )]
    pub store: StoreType,

    /// Redis URL, overrides REDIS_URL
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Per-request deadline in milliseconds
    #[arg(
        long = "timeout-ms",
        value_name = "MS",
        help = "Per-request deadline including the lock wait (default: 1000)"
    )]
    pub timeout_ms: Option<u64>,

    /// Lock TTL in milliseconds
    #[arg(
        long = "lock-ttl-ms",
        value_name = "MS",
        help = "TTL of an account lock (default: 2000)"
    )]
    pub lock_ttl_ms: Option<u64>,

    /// Merchant cache TTL in milliseconds
    #[arg(
        long = "cache-ttl-ms",
        value_name = "MS",
        help = "TTL of a cached merchant (default: 300000)"
    )]
    pub cache_ttl_ms: Option<u64>,

    /// Number of requests per batch
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of requests per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of accounts processed concurrently
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of accounts processing concurrently (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,

    /// Where to write final balances
    #[arg(
        long = "balances",
        value_name = "PATH",
        help = "Write final category balances to this CSV file"
    )]
    pub balances_file: Option<PathBuf>,
}

/// Available coordination store backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreType {
    Memory,
    Redis,
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments
    ///
    /// Missing or zero values fall back to the defaults.
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent.unwrap_or(default.max_concurrent),
            )
        } else {
            BatchConfig::default()
        }
    }

    /// Apply the CLI overrides on top of an environment-derived configuration
    pub fn apply_to(&self, mut config: AuthorizerConfig) -> AuthorizerConfig {
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_sla_ms = timeout_ms;
        }
        if let Some(lock_ttl_ms) = self.lock_ttl_ms {
            config.lock_ttl_ms = lock_ttl_ms;
        }
        if let Some(cache_ttl_ms) = self.cache_ttl_ms {
            config.cache_ttl_ms = cache_ttl_ms;
        }
        if let Some(redis_url) = &self.redis_url {
            config.redis_url = redis_url.clone();
        }
        config
    }
}
