//! CSV format handling for requests, seed data and output
//!
//! This module centralizes all CSV format concerns, providing:
//! - Record structures for deserialization (requests, accounts, merchants)
//! - Conversion from CSV records to domain types
//! - Result and balance output serialization
//!
//! All functions are pure (no file I/O) for easy testing.

use crate::core::{ProcessingResult, RequestRow};
use crate::types::{is_valid_mcc, Account, Balance, Category, Merchant, PaymentError, PaymentRequest};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::str::FromStr;
use uuid::Uuid;

/// Payment request row: `transaction,account,mcc,merchant,amount`
///
/// Every field is read as text so that a malformed value is reported with the
/// row's transaction id instead of a bare deserialization error.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PaymentCsvRecord {
    pub transaction: String,
    pub account: String,
    pub mcc: String,
    #[serde(default)]
    pub merchant: String,
    pub amount: String,
}

/// Account seed row: `account,category,priority,amount,mcc_codes,fallback`
///
/// `mcc_codes` is a `;`-separated list and may be empty.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountCsvRecord {
    pub account: String,
    pub category: String,
    pub priority: u32,
    pub amount: String,
    #[serde(default)]
    pub mcc_codes: Option<String>,
    #[serde(default)]
    pub fallback: bool,
}

/// Merchant seed row: `merchant,mcc`
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MerchantCsvRecord {
    pub merchant: String,
    pub mcc: String,
}

fn parse_uuid(value: &str, field: &str, row: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value.trim()).map_err(|_| format!("Invalid {} '{}' in row {}", field, value, row))
}

fn parse_amount(value: &str, row: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|_| format!("Invalid amount '{}' in row {}", value, row))
}

/// Convert a request row into a RequestRow
///
/// Only the identifiers must parse here. A row with an unparsable amount becomes
/// a [`RequestRow::Malformed`] carrying a validation error, and a non-positive
/// amount or a malformed MCC is left for the coordinator to reject, so every
/// identifiable row gets a `07` result.
///
/// # Returns
///
/// * `Ok(RequestRow)` - The request, or the validation error for it
/// * `Err(String)` - The transaction or account UID does not parse
pub fn convert_payment_record(record: PaymentCsvRecord) -> Result<RequestRow, String> {
    let row = record.transaction.clone();
    let transaction_uid = parse_uuid(&record.transaction, "transaction", &row)?;
    let account_uid = parse_uuid(&record.account, "account", &row)?;

    let amount = match parse_amount(&record.amount, &row) {
        Ok(amount) => amount,
        Err(message) => {
            return Ok(RequestRow::Malformed {
                transaction_uid,
                account_uid,
                error: PaymentError::validation(transaction_uid, message),
            })
        }
    };

    Ok(RequestRow::Request(PaymentRequest {
        transaction_uid,
        account_uid,
        mcc: record.mcc.trim().to_string(),
        merchant: record.merchant,
        amount,
    }))
}

/// Convert a merchant row, checking the MCC format
pub fn convert_merchant_record(record: MerchantCsvRecord) -> Result<Merchant, String> {
    let mcc = record.mcc.trim();
    if !is_valid_mcc(mcc) {
        return Err(format!("Invalid MCC '{}' for merchant '{}'", mcc, record.merchant));
    }
    Ok(Merchant::new(record.merchant, mcc))
}

/// Group account rows into accounts
///
/// Accounts get internal ids in order of first appearance, and categories get ids
/// in row order within their account. Each balance is validated as it is built.
///
/// # Returns
///
/// * `Ok(Vec<Account>)` - One account per distinct account UID
/// * `Err(String)` - A malformed row or an invalid balance
pub fn build_accounts(records: Vec<AccountCsvRecord>) -> Result<Vec<Account>, String> {
    let mut grouped: Vec<(Uuid, Vec<Category>)> = Vec::new();

    for record in records {
        let uid = parse_uuid(&record.account, "account", &record.category)?;
        let amount = parse_amount(&record.amount, &record.category)?;
        let mcc_codes: BTreeSet<String> = record
            .mcc_codes
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|mcc| !mcc.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(bad) = mcc_codes.iter().find(|mcc| !is_valid_mcc(mcc)) {
            return Err(format!("Invalid MCC '{}' for category {} of account {}", bad, record.category, uid));
        }

        let position = match grouped.iter().position(|(existing, _)| *existing == uid) {
            Some(position) => position,
            None => {
                grouped.push((uid, Vec::new()));
                grouped.len() - 1
            }
        };

        let categories = &mut grouped[position].1;
        categories.push(Category {
            id: categories.len() as u64 + 1,
            name: record.category.trim().to_string(),
            amount,
            mcc_codes,
            priority: record.priority,
            fallback: record.fallback,
        });
    }

    grouped
        .into_iter()
        .enumerate()
        .map(|(index, (uid, categories))| {
            let balance = Balance::new(categories).map_err(|e| format!("Account {}: {}", uid, e))?;
            Ok(Account::new(index as u64 + 1, uid, balance))
        })
        .collect()
}

/// Write authorization results to CSV format
///
/// Writes one row per result with columns: transaction, account, code.
/// Results are written in the order given.
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_results_csv(results: &[ProcessingResult], output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(["transaction", "account", "code"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    for result in results {
        writer
            .write_record([
                result.transaction_uid.to_string(),
                result.account_uid.to_string(),
                result.result.code.to_string(),
            ])
            .map_err(|e| format!("Failed to write result record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write final category balances to CSV format
///
/// Columns: account, category, amount. Accounts are written in internal id order
/// and categories in priority order. Amounts are written exactly as stored, at
/// their own scale and never rounded.
pub fn write_balances_csv(accounts: &[Account], output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(["account", "category", "amount"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted_accounts = accounts.to_vec();
    sorted_accounts.sort_by_key(|account| account.id);

    for account in &sorted_accounts {
        for category in account.balance.categories() {
            writer
                .write_record([
                    account.uid.to_string(),
                    category.name.clone(),
                    category.amount.to_string(),
                ])
                .map_err(|e| format!("Failed to write balance record: {}", e))?;
        }
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}
