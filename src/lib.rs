//! Card Authorizer Library
//! # Overview
//!
//! This library authorizes card payment transactions against prepaid balances split
//! into spending categories, and guarantees that concurrent transactions against
//! the same account cannot double-spend, even across instances.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Account, Balance, PaymentRequest, PaymentError, ...)
//! - [`core`] - Business logic components:
//!   - [`core::allocator`] - Splits a payment across the matched and fallback categories
//!   - [`core::lock_manager`] - Per-account lock on an expiring store key
//!   - [`core::event_bus`] - Routes store expiry events to lock waiters
//!   - [`core::merchant_cache`] - Cache-aside merchant lookup
//!   - [`core::coordinator`] - The authorization state machine
//!   - [`core::batch_processor`] - Account-partitioned concurrent batches
//! - [`store`] - Coordination store backends (in-memory, Redis)
//! - [`repository`] - In-memory account and merchant repositories
//! - [`config`] - Timeouts, TTLs and buffer sizes
//! - [`io`] - CSV reading and writing
//! - [`pipeline`] - End-to-end CSV batch run used by the binary
//! - [`cli`] - CLI arguments parsing
//!
//! # Result Codes
//!
//! - **00**: Approved
//! - **51**: Rejected, insufficient funds in the matched and fallback categories
//! - **07**: Rejected for any other reason (invalid request, lock timeout or
//!   contention, unknown account, infrastructure failure)
//!
//! # Allocation
//!
//! A transaction first draws on the category whose MCC set contains its merchant
//! category code. Whatever that category cannot cover is taken from the fallback
//! category. If the two together fall short, nothing is debited.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod repository;
pub mod store;
pub mod types;

pub use config::AuthorizerConfig;
pub use core::{ExecutionResult, PaymentCoordinator};
pub use types::{
    Account, Balance, Category, Merchant, PaymentError, PaymentRequest, ResultCode,
    TransactionRecord,
};
