//! Batch authorization pipeline
//!
//! Wires the authorizer for the command line: seeds the in-memory repositories,
//! connects the coordination store, then streams the request file through the
//! batch processor and writes one result row per request.
//!
//! # Architecture
//!
//! ```text
//! AuthorizationPipeline
//!     ├── BatchConfig (batch_size, max_concurrent)
//!     ├── AsyncReader (batch CSV reading)
//!     ├── BatchProcessor (account partitioning + tokio tasks)
//!     └── PaymentCoordinator
//!         ├── InMemoryAccountRepository / CachedMerchantRepository
//!         └── DistributedLockManager over the selected CoordinationStore
//! ```
//!
//! Batches run one after another so an account's requests keep their input order
//! across batch boundaries; within a batch, accounts run in parallel.

use crate::cli::{CliArgs, StoreType};
use crate::config::AuthorizerConfig;
use crate::core::{BatchProcessor, PaymentCoordinator, ProcessingResult};
use crate::io::async_reader::AsyncReader;
use crate::io::csv_format::{write_balances_csv, write_results_csv};
use crate::io::seed_reader::{load_accounts, load_merchants};
use crate::repository::{InMemoryAccountRepository, InMemoryMerchantRepository};
use crate::store;
use crate::types::ResultCode;
use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Configuration for batch processing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of requests per batch
    pub batch_size: usize,
    /// Maximum number of accounts processed concurrently
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a new BatchConfig; zero values fall back to the defaults
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(batch_size, default = default.batch_size, "invalid batch size, using default");
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent = if max_concurrent == 0 {
            warn!(max_concurrent, default = default.max_concurrent, "invalid concurrency, using default");
            default.max_concurrent
        } else {
            max_concurrent
        };

        Self {
            batch_size,
            max_concurrent,
        }
    }
}

/// Files read and written by a pipeline run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineFiles {
    /// Payment request CSV
    pub requests: PathBuf,
    /// Account seed CSV
    pub accounts: PathBuf,
    /// Optional merchant seed CSV
    pub merchants: Option<PathBuf>,
    /// Optional final balances output CSV
    pub balances: Option<PathBuf>,
}

impl From<&CliArgs> for PipelineFiles {
    fn from(args: &CliArgs) -> Self {
        Self {
            requests: args.input_file.clone(),
            accounts: args.accounts_file.clone(),
            merchants: args.merchants_file.clone(),
            balances: args.balances_file.clone(),
        }
    }
}

/// Outcome counts of a pipeline run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub approved: usize,
    pub insufficient_funds: usize,
    pub rejected: usize,
}

impl PipelineSummary {
    fn from_results(results: &[ProcessingResult]) -> Self {
        results
            .iter()
            .fold(Self::default(), |mut summary, result| {
                match result.result.code {
                    ResultCode::Approved => summary.approved += 1,
                    ResultCode::InsufficientFunds => summary.insufficient_funds += 1,
                    ResultCode::Rejected => summary.rejected += 1,
                }
                summary
            })
    }

    /// Total number of requests that produced a result
    pub fn total(&self) -> usize {
        self.approved + self.insufficient_funds + self.rejected
    }
}

/// End-to-end batch authorization
#[derive(Debug, Clone)]
pub struct AuthorizationPipeline {
    config: AuthorizerConfig,
    store_type: StoreType,
    batch: BatchConfig,
}

impl AuthorizationPipeline {
    /// Create a pipeline
    pub fn new(config: AuthorizerConfig, store_type: StoreType, batch: BatchConfig) -> Self {
        Self {
            config,
            store_type,
            batch,
        }
    }

    /// Create a pipeline from the environment and the CLI overrides
    pub fn from_args(args: &CliArgs) -> Self {
        Self::new(
            args.apply_to(AuthorizerConfig::from_env()),
            args.store,
            args.to_batch_config(),
        )
    }

    /// Run the pipeline on a dedicated multi-threaded runtime
    ///
    /// # Arguments
    ///
    /// * `files` - Input seeds and request file, optional balances output
    /// * `output` - Writer receiving the results CSV
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a seed file cannot be
    /// loaded, the store cannot be reached, or the request file cannot be opened.
    /// Individual request failures are reported as result codes, not errors.
    pub fn run(&self, files: &PipelineFiles, output: &mut dyn Write) -> anyhow::Result<PipelineSummary> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.batch.max_concurrent)
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?;

        runtime.block_on(self.process(files, output))
    }

    /// Run the pipeline on the current runtime
    pub async fn process(&self, files: &PipelineFiles, output: &mut dyn Write) -> anyhow::Result<PipelineSummary> {
        self.config.validate()?;

        let accounts = Arc::new(InMemoryAccountRepository::new());
        for account in load_accounts(&files.accounts).map_err(anyhow::Error::msg)? {
            accounts.insert(account);
        }

        let merchants = Arc::new(InMemoryMerchantRepository::new());
        if let Some(path) = &files.merchants {
            for merchant in load_merchants(path).map_err(anyhow::Error::msg)? {
                merchants.insert(merchant);
            }
        }
        info!(accounts = accounts.len(), merchants = merchants.len(), "seed data loaded");

        let store = store::connect(self.store_type, &self.config).await?;
        let coordinator =
            PaymentCoordinator::from_config(&self.config, store, accounts.clone(), merchants).await?;
        let processor = BatchProcessor::new(Arc::new(coordinator), self.batch.max_concurrent);

        let file = tokio::fs::File::open(&files.requests)
            .await
            .with_context(|| format!("Failed to open file '{}'", files.requests.display()))?;
        let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
        let mut reader = AsyncReader::new(compat_file);

        let mut results = Vec::new();
        while let Some(batch) = reader.read_batch(self.batch.batch_size).await {
            results.extend(processor.process_batch(batch).await);
        }

        write_results_csv(&results, output).map_err(anyhow::Error::msg)?;

        if let Some(path) = &files.balances {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create file '{}'", path.display()))?;
            write_balances_csv(&accounts.accounts(), &mut file).map_err(anyhow::Error::msg)?;
        }

        let summary = PipelineSummary::from_results(&results);
        info!(
            total = summary.total(),
            approved = summary.approved,
            insufficient_funds = summary.insufficient_funds,
            rejected = summary.rejected,
            "authorization run complete"
        );

        Ok(summary)
    }
}
