//! Repository implementations
//!
//! In-process implementations of the account and merchant repositories, seeded
//! by the CLI from CSV files.

pub mod memory;

pub use memory::{InMemoryAccountRepository, InMemoryMerchantRepository};
