//! Batch processing with account-based partitioning
//!
//! This module provides the `BatchProcessor` struct, which authorizes a batch of
//! payment requests concurrently while keeping the requests of each account in
//! input order.
//!
//! # Design
//!
//! A batch is partitioned by account UID. Each account's requests run
//! sequentially in one tokio task; different accounts run in parallel, bounded by
//! a semaphore. Results carry the sequence number of their request so the batch
//! can be reported in input order.
//!
//! Cross-instance exclusion is still the job of the distributed lock. Sequencing
//! per account here only makes a single run deterministic.
//!
//! # Architecture
//!
//! ```text
//! BatchProcessor
//!     ├── Arc<PaymentCoordinator>  (shared authorizer)
//!     └── Arc<Semaphore>           (max accounts in flight)
//! ```

use crate::core::coordinator::{ExecutionResult, PaymentCoordinator};
use crate::types::{PaymentError, PaymentRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;
use uuid::Uuid;

/// One input row that identifies a transaction and its account
#[derive(Debug, Clone, PartialEq)]
pub enum RequestRow {
    /// A well-formed request, authorized by the coordinator
    Request(PaymentRequest),

    /// A row whose fields could not be turned into a request; answered with `07`
    /// without touching the account
    Malformed {
        transaction_uid: Uuid,
        account_uid: Uuid,
        error: PaymentError,
    },
}

impl RequestRow {
    /// Transaction UID of the row
    pub fn transaction_uid(&self) -> Uuid {
        match self {
            RequestRow::Request(request) => request.transaction_uid,
            RequestRow::Malformed { transaction_uid, .. } => *transaction_uid,
        }
    }

    /// Account UID of the row
    pub fn account_uid(&self) -> Uuid {
        match self {
            RequestRow::Request(request) => request.account_uid,
            RequestRow::Malformed { account_uid, .. } => *account_uid,
        }
    }
}

impl From<PaymentRequest> for RequestRow {
    fn from(request: PaymentRequest) -> Self {
        RequestRow::Request(request)
    }
}

/// An input row tagged with its position in the input
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedRequest {
    /// Zero-based position of the row in the input
    pub sequence: u64,

    /// The row itself
    pub row: RequestRow,
}

/// Result of authorizing a single request
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    /// Position of the request in the input
    pub sequence: u64,

    /// Transaction UID of the request
    pub transaction_uid: Uuid,

    /// Account UID of the request
    pub account_uid: Uuid,

    /// Outcome of the authorization
    pub result: ExecutionResult,
}

/// Batch processor with account-based partitioning
#[derive(Clone)]
pub struct BatchProcessor {
    coordinator: Arc<PaymentCoordinator>,
    permits: Arc<Semaphore>,
}

impl BatchProcessor {
    /// Create a new BatchProcessor
    ///
    /// # Arguments
    ///
    /// * `coordinator` - Authorizer shared by every task
    /// * `max_concurrent` - Maximum number of accounts processed at once (at least 1)
    pub fn new(coordinator: Arc<PaymentCoordinator>, max_concurrent: usize) -> Self {
        Self {
            coordinator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Partition a batch of requests by account UID
    ///
    /// # Guarantees
    ///
    /// - Each request appears in exactly one sub-batch
    /// - Requests for each account keep their original order
    pub fn partition_by_account(
        &self,
        batch: Vec<SequencedRequest>,
    ) -> HashMap<Uuid, Vec<SequencedRequest>> {
        let mut account_batches: HashMap<Uuid, Vec<SequencedRequest>> = HashMap::new();

        for item in batch {
            account_batches
                .entry(item.row.account_uid())
                .or_default()
                .push(item);
        }

        account_batches
    }

    /// Authorize one account's requests sequentially, in the given order
    pub async fn process_account_requests(
        &self,
        requests: Vec<SequencedRequest>,
    ) -> Vec<ProcessingResult> {
        let mut results = Vec::with_capacity(requests.len());

        for SequencedRequest { sequence, row } in requests {
            let transaction_uid = row.transaction_uid();
            let account_uid = row.account_uid();
            let result = match row {
                RequestRow::Request(request) => self.coordinator.execute(request).await,
                RequestRow::Malformed { error, .. } => {
                    error!(
                        row = sequence,
                        transaction_uid = %transaction_uid,
                        account_uid = %account_uid,
                        error = %error,
                        "transaction failed"
                    );
                    ExecutionResult::rejected(error)
                }
            };
            results.push(ProcessingResult {
                sequence,
                transaction_uid,
                account_uid,
                result,
            });
        }

        results
    }

    /// Authorize a batch of requests
    ///
    /// Spawns one task per account and waits for all of them.
    ///
    /// # Returns
    ///
    /// One result per request, sorted by sequence number.
    pub async fn process_batch(&self, batch: Vec<SequencedRequest>) -> Vec<ProcessingResult> {
        let account_batches = self.partition_by_account(batch);

        let mut tasks = Vec::with_capacity(account_batches.len());
        for (_account_uid, requests) in account_batches {
            let processor = self.clone();
            let permits = Arc::clone(&self.permits);
            tasks.push(tokio::spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                processor.process_account_requests(requests).await
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(account_results) => results.extend(account_results),
                Err(e) => error!(error = %e, "account task panicked"),
            }
        }

        results.sort_by_key(|result| result.sequence);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorizerConfig;
    use crate::core::traits::AccountRepository;
    use crate::repository::{InMemoryAccountRepository, InMemoryMerchantRepository};
    use crate::store::InMemoryStore;
    use crate::types::{Account, Balance, Category, ResultCode};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn cash_only(amount: Decimal) -> Balance {
        Balance::new(vec![Category {
            id: 1,
            name: "CASH".to_string(),
            amount,
            mcc_codes: Default::default(),
            priority: 1,
            fallback: true,
        }])
        .unwrap()
    }

    async fn processor(accounts: &[(Uuid, Decimal)]) -> (BatchProcessor, Arc<InMemoryAccountRepository>) {
        let repo = Arc::new(InMemoryAccountRepository::new());
        for (id, (uid, amount)) in accounts.iter().enumerate() {
            repo.insert(Account::new(id as u64 + 1, *uid, cash_only(*amount)));
        }
        let coordinator = PaymentCoordinator::from_config(
            &AuthorizerConfig::default(),
            InMemoryStore::start(64, Duration::from_millis(10)),
            repo.clone(),
            Arc::new(InMemoryMerchantRepository::new()),
        )
        .await
        .unwrap();

        (BatchProcessor::new(Arc::new(coordinator), 4), repo)
    }

    fn item(sequence: u64, account_uid: Uuid, amount: Decimal) -> SequencedRequest {
        SequencedRequest {
            sequence,
            row: RequestRow::Request(PaymentRequest {
                transaction_uid: Uuid::new_v4(),
                account_uid,
                mcc: "7995".to_string(),
                merchant: String::new(),
                amount,
            }),
        }
    }

    #[tokio::test]
    async fn test_partition_keeps_account_order() {
        let (processor, _) = processor(&[]).await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let partitioned = processor.partition_by_account(vec![
            item(0, a, dec!(1)),
            item(1, b, dec!(1)),
            item(2, a, dec!(1)),
            item(3, b, dec!(1)),
            item(4, a, dec!(1)),
        ]);

        assert_eq!(partitioned.len(), 2);
        let sequences = |uid: Uuid| -> Vec<u64> { partitioned[&uid].iter().map(|i| i.sequence).collect() };
        assert_eq!(sequences(a), vec![0, 2, 4]);
        assert_eq!(sequences(b), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_partition_empty_batch() {
        let (processor, _) = processor(&[]).await;

        assert!(processor.partition_by_account(vec![]).is_empty());
    }

    #[tokio::test]
    async fn test_results_are_in_input_order() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (processor, _) = processor(&[(a, dec!(10)), (b, dec!(10)), (c, dec!(10))]).await;

        let results = processor
            .process_batch(vec![
                item(0, c, dec!(1)),
                item(1, a, dec!(1)),
                item(2, b, dec!(1)),
                item(3, c, dec!(1)),
            ])
            .await;

        let sequences: Vec<u64> = results.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert!(results.iter().all(|r| r.result.is_approved()));
    }

    #[tokio::test]
    async fn test_same_account_requests_apply_in_order() {
        let account = Uuid::new_v4();
        let (processor, repo) = processor(&[(account, dec!(10))]).await;

        let results = processor
            .process_batch(vec![
                item(0, account, dec!(6)),
                item(1, account, dec!(6)),
                item(2, account, dec!(4)),
            ])
            .await;

        let codes: Vec<ResultCode> = results.iter().map(|r| r.result.code).collect();
        assert_eq!(
            codes,
            vec![ResultCode::Approved, ResultCode::InsufficientFunds, ResultCode::Approved]
        );
        let stored = repo.find_by_uid(account).await.unwrap();
        assert_eq!(stored.balance.amount_total(), dec!(0));
    }

    #[tokio::test]
    async fn test_malformed_row_is_07_and_keeps_account_order() {
        let account = Uuid::new_v4();
        let (processor, repo) = processor(&[(account, dec!(10))]).await;
        let transaction_uid = Uuid::new_v4();
        let malformed = SequencedRequest {
            sequence: 1,
            row: RequestRow::Malformed {
                transaction_uid,
                account_uid: account,
                error: PaymentError::validation(transaction_uid, "malformed amount 'five'"),
            },
        };

        let results = processor
            .process_batch(vec![item(0, account, dec!(4)), malformed, item(2, account, dec!(6))])
            .await;

        let codes: Vec<ResultCode> = results.iter().map(|r| r.result.code).collect();
        assert_eq!(
            codes,
            vec![ResultCode::Approved, ResultCode::Rejected, ResultCode::Approved]
        );
        assert_eq!(results[1].transaction_uid, transaction_uid);
        assert!(matches!(results[1].result.error, Some(PaymentError::Validation { .. })));
        let stored = repo.find_by_uid(account).await.unwrap();
        assert_eq!(stored.balance.amount_total(), dec!(0));
    }
}
