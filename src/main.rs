//! Card Authorizer CLI
//!
//! Command-line interface for authorizing card payment requests from CSV files.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --accounts accounts.csv requests.csv > results.csv
//! cargo run -- --accounts accounts.csv --merchants merchants.csv requests.csv > results.csv
//! cargo run -- --accounts accounts.csv --balances balances.csv requests.csv > results.csv
//! cargo run -- --store redis --redis-url redis://127.0.0.1:6379/0 --accounts accounts.csv requests.csv
//! ```
//!
//! The program seeds accounts (and optionally merchants) from CSV, authorizes every
//! request of the input file and writes `transaction,account,code` rows to stdout.
//! Logs go to stderr and are filtered with `RUST_LOG`.
//!
//! # Exit Codes
//!
//! - 0: Success (individual rejections are reported in the output, not as failures)
//! - 1: Error (invalid configuration, missing file, unreachable store, etc.)

use card_authorizer::cli;
use card_authorizer::pipeline::{AuthorizationPipeline, PipelineFiles};
use std::process;
use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

fn main() {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();
    let pipeline = AuthorizationPipeline::from_args(&args);
    let files = PipelineFiles::from(&args);

    // Results go to stdout
    let mut output = std::io::stdout();
    if let Err(e) = pipeline.run(&files, &mut output) {
        error!(error = %format!("{e:#}"), "authorization run failed");
        process::exit(1);
    }
}
