//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: Account, Balance and Category
//! - `transaction`: Requests, allocator debits, persisted records and result codes
//! - `merchant`: Merchant name to MCC entries
//! - `error`: Error types for the authorizer

pub mod account;
pub mod error;
pub mod merchant;
pub mod transaction;

pub use account::{Account, Balance, Category};
pub use error::PaymentError;
pub use merchant::Merchant;
pub use transaction::{
    is_valid_mcc, AccountId, CategoryDebit, CategoryId, PaymentRequest, PaymentTransaction,
    ResultCode, TransactionRecord,
};
