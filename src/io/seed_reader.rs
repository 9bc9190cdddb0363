//! Synchronous readers for seed data
//!
//! Loads the accounts and merchants the in-memory repositories start from. Seed
//! files are small and read once at startup with `csv::Reader`. Unlike request
//! rows, a bad seed row is fatal: running against a half-loaded account set would
//! produce wrong authorizations.

use crate::io::csv_format::{
    build_accounts, convert_merchant_record, AccountCsvRecord, MerchantCsvRecord,
};
use crate::types::{Account, Merchant};
use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::Path;

/// Read every row of a CSV file, failing on the first malformed one
///
/// Error messages carry the file line number (the header is line 1).
fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, String> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(file);

    reader
        .deserialize::<T>()
        .enumerate()
        .map(|(index, row)| {
            row.map_err(|e| format!("{} line {}: CSV parse error: {}", path.display(), index + 2, e))
        })
        .collect()
}

/// Load accounts from `account,category,priority,amount,mcc_codes,fallback` rows
///
/// # Returns
///
/// * `Ok(Vec<Account>)` - Accounts with validated balances
/// * `Err(String)` - The file is missing, a row is malformed or a balance is invalid
pub fn load_accounts(path: &Path) -> Result<Vec<Account>, String> {
    let rows = read_rows::<AccountCsvRecord>(path)?;
    build_accounts(rows).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Load merchants from `merchant,mcc` rows
pub fn load_merchants(path: &Path) -> Result<Vec<Merchant>, String> {
    read_rows::<MerchantCsvRecord>(path)?
        .into_iter()
        .enumerate()
        .map(|(index, row)| {
            convert_merchant_record(row)
                .map_err(|e| format!("{} line {}: {}", path.display(), index + 2, e))
        })
        .collect()
}
