//! I/O module
//!
//! Handles CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, output serialization)
//! - `seed_reader` - Synchronous loading of account and merchant seed files
//! - `async_reader` - Asynchronous payment request reader with batch interface

pub mod async_reader;
pub mod csv_format;
pub mod seed_reader;

pub use async_reader::AsyncReader;
pub use csv_format::{
    convert_payment_record, write_balances_csv, write_results_csv, PaymentCsvRecord,
};
pub use seed_reader::{load_accounts, load_merchants};
