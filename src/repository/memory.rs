//! In-memory repositories
//!
//! DashMap-backed account and merchant repositories. They stand in for the
//! production persistence engine in tests and in the CLI, which seeds them from
//! CSV files.
//!
//! # Thread Safety
//!
//! `DashMap` shards its locks, so different accounts are read and written
//! concurrently. Saving a transaction holds the account's entry for the whole
//! write: the debits and the records land together or not at all, and no reader
//! can observe a half-applied set.

use crate::core::traits::{AccountRepository, MerchantRepository};
use crate::types::{Account, CategoryDebit, Merchant, PaymentError, TransactionRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// One stored account with its transaction history
#[derive(Debug, Clone)]
struct AccountRow {
    account: Account,
    transactions: Vec<TransactionRecord>,
}

/// Account repository held in process memory
#[derive(Debug, Default)]
pub struct InMemoryAccountRepository {
    accounts: DashMap<Uuid, AccountRow>,
}

impl InMemoryAccountRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account, clearing its history
    pub fn insert(&self, account: Account) {
        self.accounts.insert(
            account.uid,
            AccountRow {
                account,
                transactions: Vec::new(),
            },
        );
    }

    /// Transaction records persisted for an account, oldest first
    pub fn transactions(&self, uid: Uuid) -> Vec<TransactionRecord> {
        self.accounts
            .get(&uid)
            .map(|row| row.transactions.clone())
            .unwrap_or_default()
    }

    /// Snapshot of every account, ordered by internal id
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .map(|row| row.account.clone())
            .collect();
        accounts.sort_by_key(|account| account.id);
        accounts
    }

    /// Number of stored accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the repository holds no accounts
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_uid(&self, uid: Uuid) -> Result<Account, PaymentError> {
        self.accounts
            .get(&uid)
            .map(|row| row.account.clone())
            .ok_or_else(|| PaymentError::account_not_found(uid))
    }

    async fn save_transactions(&self, records: &[TransactionRecord]) -> Result<(), PaymentError> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        if records.iter().any(|record| record.account_uid != first.account_uid) {
            return Err(PaymentError::repository(
                "save transactions",
                "records span more than one account",
            ));
        }

        let mut row = self
            .accounts
            .get_mut(&first.account_uid)
            .ok_or_else(|| PaymentError::account_not_found(first.account_uid))?;

        let debits: Vec<CategoryDebit> = records
            .iter()
            .map(|record| CategoryDebit {
                category_id: record.category_id,
                category: record.category.clone(),
                priority: row
                    .account
                    .balance
                    .category(record.category_id)
                    .map(|category| category.priority)
                    .unwrap_or_default(),
                amount: record.amount,
            })
            .collect();

        // The debits were allocated under the account lock; a shortfall here
        // means the stored balance moved underneath it, not a customer decline.
        row.account
            .apply_debits(&debits)
            .map_err(|e| PaymentError::repository("save transactions", e.to_string()))?;
        row.transactions.extend_from_slice(records);

        Ok(())
    }
}

/// Merchant repository held in process memory
#[derive(Debug, Default)]
pub struct InMemoryMerchantRepository {
    merchants: DashMap<String, Merchant>,
}

impl InMemoryMerchantRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a merchant
    pub fn insert(&self, merchant: Merchant) {
        self.merchants.insert(merchant.name.clone(), merchant);
    }

    /// Number of stored merchants
    pub fn len(&self) -> usize {
        self.merchants.len()
    }

    /// Whether the repository holds no merchants
    pub fn is_empty(&self) -> bool {
        self.merchants.is_empty()
    }
}

#[async_trait]
impl MerchantRepository for InMemoryMerchantRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Merchant>, PaymentError> {
        Ok(self.merchants.get(name).map(|merchant| merchant.clone()))
    }
}
