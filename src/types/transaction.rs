//! Transaction-related types for the card authorizer
//!
//! This module defines the incoming payment request, the transaction handed to the
//! allocator, the per-category debits the allocator produces and the immutable
//! transaction records that get persisted.

use super::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Internal account identifier
pub type AccountId = u64;

/// Internal category identifier
pub type CategoryId = u64;

/// Result codes returned to the caller
///
/// The transport layer always answers successfully and carries the code in the
/// body; the code alone tells the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// `00` - transaction approved
    #[serde(rename = "00")]
    Approved,

    /// `51` - rejected, insufficient funds
    #[serde(rename = "51")]
    InsufficientFunds,

    /// `07` - rejected, generic failure (validation, infrastructure, timeout, contention)
    #[serde(rename = "07")]
    Rejected,
}

impl ResultCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Approved => "00",
            ResultCode::InsufficientFunds => "51",
            ResultCode::Rejected => "07",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incoming payment request
///
/// Exactly what the caller submits: the merchant name may later override the MCC
/// when the merchant is known.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    /// Unique transaction identifier chosen by the caller
    pub transaction_uid: Uuid,

    /// External account identifier
    pub account_uid: Uuid,

    /// Merchant category code as reported by the card network
    pub mcc: String,

    /// Merchant name as printed on the statement
    pub merchant: String,

    /// Amount to debit, exact decimal
    pub amount: Decimal,
}

impl PaymentRequest {
    /// Validate the request before any lock is taken
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the amount is positive and the MCC is four ASCII digits
    /// * `Err(PaymentError::Validation)` otherwise
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::validation(
                self.transaction_uid,
                format!("amount must be positive, got {}", self.amount),
            ));
        }

        if !is_valid_mcc(&self.mcc) {
            return Err(PaymentError::validation(
                self.transaction_uid,
                format!("malformed MCC '{}'", self.mcc),
            ));
        }

        Ok(())
    }
}

/// Check that an MCC is exactly four ASCII digits
pub fn is_valid_mcc(mcc: &str) -> bool {
    mcc.len() == 4 && mcc.bytes().all(|b| b.is_ascii_digit())
}

/// Transaction as seen by the allocator
///
/// Built from a [`PaymentRequest`] after the merchant has been resolved, so `mcc`
/// is the effective code used for category matching.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentTransaction {
    /// Unique transaction identifier
    pub uid: Uuid,

    /// External account identifier
    pub account_uid: Uuid,

    /// Effective merchant category code
    pub mcc: String,

    /// Merchant name
    pub merchant: String,

    /// Amount to debit
    pub amount: Decimal,
}

impl PaymentTransaction {
    /// Build the allocator input from a request and the resolved merchant MCC
    ///
    /// A known merchant's MCC takes precedence over the code on the request.
    pub fn from_request(request: &PaymentRequest, merchant_mcc: Option<&str>) -> Self {
        Self {
            uid: request.transaction_uid,
            account_uid: request.account_uid,
            mcc: merchant_mcc.unwrap_or(&request.mcc).to_string(),
            merchant: request.merchant.clone(),
            amount: request.amount,
        }
    }

    /// Turn allocator debits into the records to persist
    pub fn to_records(&self, account_id: AccountId, debits: &[CategoryDebit]) -> Vec<TransactionRecord> {
        debits
            .iter()
            .map(|debit| TransactionRecord {
                uid: self.uid,
                account_id,
                account_uid: self.account_uid,
                category_id: debit.category_id,
                category: debit.category.clone(),
                mcc: self.mcc.clone(),
                merchant: self.merchant.clone(),
                amount: debit.amount,
            })
            .collect()
    }
}

/// One category touched by an allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDebit {
    /// Category being debited
    pub category_id: CategoryId,

    /// Category name, kept for logs and records
    pub category: String,

    /// Priority of the category within its balance
    pub priority: u32,

    /// Amount taken from the category
    pub amount: Decimal,
}

/// Immutable record of one authorized debit
///
/// A single payment request produces one record per category it touched; the set
/// is persisted atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction UID shared by every record of the same request
    pub uid: Uuid,

    /// Internal account identifier
    pub account_id: AccountId,

    /// External account identifier
    pub account_uid: Uuid,

    /// Debited category
    pub category_id: CategoryId,

    /// Debited category name
    pub category: String,

    /// Effective MCC of the transaction
    pub mcc: String,

    /// Merchant name
    pub merchant: String,

    /// Debited amount
    pub amount: Decimal,
}
