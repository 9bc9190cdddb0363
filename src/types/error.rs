//! Error types for the card authorizer
//!
//! This module defines every error that can end a payment authorization, and the
//! mapping from each error to the result code returned to the caller.
//!
//! # Error Categories
//!
//! - **Validation Errors**: Malformed requests (non-positive amount, bad MCC)
//! - **Lock Errors**: Timeout or contention while acquiring the account lock
//! - **Business Rejections**: Insufficient funds across the eligible categories
//! - **Infrastructure Errors**: Repository or coordination store failures
//! - **Configuration Errors**: Balances without a usable fallback category

use super::transaction::ResultCode;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the authorizer
///
/// Every variant maps onto one of the result codes through
/// [`PaymentError::result_code`]. Only `InsufficientFunds` is a business
/// rejection; everything else is surfaced as a generic rejection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PaymentError {
    /// The incoming request is malformed
    #[error("Invalid payment request {transaction}: {message}")]
    Validation {
        /// Transaction UID of the rejected request
        transaction: Uuid,
        /// Description of the validation failure
        message: String,
    },

    /// The account lock was not released before the request deadline
    ///
    /// This is a recoverable rejection: the request can be retried later.
    #[error("Timed out after {waited_ms} ms waiting for lock {key}")]
    LockTimeout {
        /// Lock key that stayed held
        key: String,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// Another waiter won the lock after the release notification
    #[error("Lock {key} was taken by a concurrent transaction")]
    LockContention {
        /// Lock key that was contended
        key: String,
    },

    /// The request was cancelled by its caller
    #[error("Cancelled during {operation}")]
    Cancelled {
        /// Step that was interrupted
        operation: String,
    },

    /// The request deadline elapsed during a downstream call
    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded {
        /// Step that was interrupted
        operation: String,
    },

    /// Neither the matched category nor the fallback can cover the amount
    #[error("Insufficient funds for account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Account UID
        account: Uuid,
        /// Funds reachable by this transaction (matched + fallback)
        available: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// No account exists for the given UID
    #[error("Account {account} not found")]
    AccountNotFound {
        /// Account UID that was looked up
        account: Uuid,
    },

    /// A repository call failed
    #[error("Repository error during {operation}: {message}")]
    Repository {
        /// Repository operation that failed
        operation: String,
        /// Underlying failure
        message: String,
    },

    /// The coordination store (lock and cache backend) failed
    #[error("Coordination store error: {message}")]
    Store {
        /// Underlying failure
        message: String,
    },

    /// Balance data violates a configuration invariant
    ///
    /// This is an operability defect, not a business outcome, and is logged at
    /// error severity.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the broken invariant
        message: String,
    },
}

impl PaymentError {
    /// Result code reported to the caller for this error
    pub fn result_code(&self) -> ResultCode {
        match self {
            PaymentError::InsufficientFunds { .. } => ResultCode::InsufficientFunds,
            _ => ResultCode::Rejected,
        }
    }

    /// Whether this error is an expected business outcome (logged at warn)
    pub fn is_business_rejection(&self) -> bool {
        matches!(self, PaymentError::InsufficientFunds { .. })
    }

    /// Create a Validation error
    pub fn validation(transaction: Uuid, message: impl Into<String>) -> Self {
        PaymentError::Validation {
            transaction,
            message: message.into(),
        }
    }

    /// Create a LockTimeout error
    pub fn lock_timeout(key: &str, waited_ms: u64) -> Self {
        PaymentError::LockTimeout {
            key: key.to_string(),
            waited_ms,
        }
    }

    /// Create a LockContention error
    pub fn lock_contention(key: &str) -> Self {
        PaymentError::LockContention {
            key: key.to_string(),
        }
    }

    /// Create a Cancelled error
    pub fn cancelled(operation: &str) -> Self {
        PaymentError::Cancelled {
            operation: operation.to_string(),
        }
    }

    /// Create a DeadlineExceeded error
    pub fn deadline_exceeded(operation: &str) -> Self {
        PaymentError::DeadlineExceeded {
            operation: operation.to_string(),
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(account: Uuid, available: Decimal, requested: Decimal) -> Self {
        PaymentError::InsufficientFunds {
            account,
            available,
            requested,
        }
    }

    /// Create an AccountNotFound error
    pub fn account_not_found(account: Uuid) -> Self {
        PaymentError::AccountNotFound { account }
    }

    /// Create a Repository error
    pub fn repository(operation: &str, message: impl Into<String>) -> Self {
        PaymentError::Repository {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a Store error
    pub fn store(message: impl Into<String>) -> Self {
        PaymentError::Store {
            message: message.into(),
        }
    }

    /// Create a Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        PaymentError::Configuration {
            message: message.into(),
        }
    }
}

// Conversion from redis errors: any store failure is a generic rejection
impl From<redis::RedisError> for PaymentError {
    fn from(error: redis::RedisError) -> Self {
        PaymentError::store(error.to_string())
    }
}
