//! Transaction coordinator
//!
//! Runs one payment request through the authorization state machine:
//!
//! ```text
//! Started → Locked → AccountLoaded → MerchantResolved → Allocated → Persisted → Unlocked
//!              └──────────────── any failure ──────────────────────────────────→ Unlocked
//! ```
//!
//! Validation happens before the lock is taken. Once the lock is held it is
//! released on every path, successful or not; a release failure is only logged
//! because the lock TTL bounds the damage. The whole request, lock wait included,
//! runs under a single deadline.
//!
//! The outcome is always an [`ExecutionResult`]: `00` approved, `51` insufficient
//! funds, `07` anything else.

use crate::config::AuthorizerConfig;
use crate::core::allocator::allocate;
use crate::core::context::RequestContext;
use crate::core::event_bus::ExpiryEventBus;
use crate::core::lock_manager::{account_lock_key, DistributedLockManager};
use crate::core::merchant_cache::CachedMerchantRepository;
use crate::core::traits::{AccountRepository, CoordinationStore, MerchantRepository};
use crate::types::{PaymentError, PaymentRequest, PaymentTransaction, ResultCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Outcome of one authorization
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Result code returned to the caller
    pub code: ResultCode,

    /// Why the request was rejected; `None` when approved
    pub error: Option<PaymentError>,
}

impl ExecutionResult {
    fn approved() -> Self {
        Self {
            code: ResultCode::Approved,
            error: None,
        }
    }

    pub(crate) fn rejected(error: PaymentError) -> Self {
        Self {
            code: error.result_code(),
            error: Some(error),
        }
    }

    /// Whether the transaction was approved
    pub fn is_approved(&self) -> bool {
        self.code == ResultCode::Approved
    }
}

/// Steps of the authorization state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Started,
    Locked,
    AccountLoaded,
    MerchantResolved,
    Allocated,
    Persisted,
    Unlocked,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Started => "started",
            CoordinatorState::Locked => "locked",
            CoordinatorState::AccountLoaded => "account_loaded",
            CoordinatorState::MerchantResolved => "merchant_resolved",
            CoordinatorState::Allocated => "allocated",
            CoordinatorState::Persisted => "persisted",
            CoordinatorState::Unlocked => "unlocked",
        };
        f.write_str(name)
    }
}

/// Authorizes payment requests against account balances
///
/// Cheap to clone; clones share the repositories and the lock manager, so one
/// coordinator can serve any number of concurrent tasks.
#[derive(Clone)]
pub struct PaymentCoordinator {
    accounts: Arc<dyn AccountRepository>,
    merchants: Arc<dyn MerchantRepository>,
    locks: DistributedLockManager,
    timeout: Duration,
}

impl PaymentCoordinator {
    /// Create a coordinator from its parts
    ///
    /// # Arguments
    ///
    /// * `accounts` - Account repository
    /// * `merchants` - Merchant lookup, usually a [`CachedMerchantRepository`]
    /// * `locks` - Lock manager serializing each account
    /// * `timeout` - Per-request deadline
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        merchants: Arc<dyn MerchantRepository>,
        locks: DistributedLockManager,
        timeout: Duration,
    ) -> Self {
        Self {
            accounts,
            merchants,
            locks,
            timeout,
        }
    }

    /// Wire a coordinator over a coordination store
    ///
    /// Starts the expiry event bus on `store` and puts the merchant cache in front of
    /// `merchants`, both sharing the same store.
    pub async fn from_config(
        config: &AuthorizerConfig,
        store: Arc<dyn CoordinationStore>,
        accounts: Arc<dyn AccountRepository>,
        merchants: Arc<dyn MerchantRepository>,
    ) -> Result<Self, PaymentError> {
        config.validate()?;

        let events = ExpiryEventBus::start(store.as_ref(), config.listener_buffer).await?;
        let locks = DistributedLockManager::new(Arc::clone(&store), events, config.lock_ttl());
        let merchants = CachedMerchantRepository::new(merchants, store, config.cache_ttl());

        Ok(Self::new(accounts, Arc::new(merchants), locks, config.timeout_sla()))
    }

    /// Authorize one payment request
    pub async fn execute(&self, request: PaymentRequest) -> ExecutionResult {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Authorize one payment request, abandoning it if `cancellation` fires
    pub async fn execute_with_cancellation(
        &self,
        request: PaymentRequest,
        cancellation: CancellationToken,
    ) -> ExecutionResult {
        let span = info_span!(
            "execute",
            transaction_uid = %request.transaction_uid,
            account_uid = %request.account_uid
        );

        async move {
            let ctx = RequestContext::with_cancellation(&request, self.timeout, cancellation);
            let mut state = CoordinatorState::Started;

            match self.authorize(&ctx, &request, &mut state).await {
                Ok(()) => {
                    info!(amount = %request.amount, elapsed_ms = ctx.elapsed_ms(), "transaction approved");
                    ExecutionResult::approved()
                }
                Err(e) => {
                    let result = ExecutionResult::rejected(e);
                    if let Some(error) = &result.error {
                        if error.is_business_rejection() {
                            warn!(code = %result.code, %state, error = %error, "transaction rejected");
                        } else {
                            error!(code = %result.code, %state, error = %error, "transaction failed");
                        }
                    }
                    result
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn authorize(
        &self,
        ctx: &RequestContext,
        request: &PaymentRequest,
        state: &mut CoordinatorState,
    ) -> Result<(), PaymentError> {
        request.validate()?;

        let key = account_lock_key(request.account_uid);
        let guard = self.locks.acquire(ctx, &key).await?;
        *state = CoordinatorState::Locked;

        let outcome = self.process_locked(ctx, request, state).await;

        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "lock release failed, lock will expire by TTL");
        }
        debug!(key = %key, from = %state, "unlocked");
        *state = CoordinatorState::Unlocked;

        outcome
    }

    async fn process_locked(
        &self,
        ctx: &RequestContext,
        request: &PaymentRequest,
        state: &mut CoordinatorState,
    ) -> Result<(), PaymentError> {
        let account = ctx
            .guard("account load", self.accounts.find_by_uid(request.account_uid))
            .await?;
        *state = CoordinatorState::AccountLoaded;

        let merchant = ctx
            .guard("merchant resolution", self.merchants.find_by_name(&request.merchant))
            .await?;
        *state = CoordinatorState::MerchantResolved;

        let merchant_mcc = merchant.as_ref().map(|merchant| merchant.mcc.as_str());
        if let Some(mcc) = merchant_mcc.filter(|mcc| *mcc != request.mcc) {
            debug!(request_mcc = %request.mcc, merchant_mcc = %mcc, "merchant MCC overrides request MCC");
        }

        let transaction = PaymentTransaction::from_request(request, merchant_mcc);
        let debits = allocate(&account.balance, &transaction)?;
        *state = CoordinatorState::Allocated;

        let records = transaction.to_records(account.id, &debits);
        ctx.guard("persist transactions", self.accounts.save_transactions(&records))
            .await?;
        *state = CoordinatorState::Persisted;

        debug!(records = records.len(), "transaction persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryAccountRepository, InMemoryMerchantRepository};
    use crate::store::InMemoryStore;
    use crate::types::{Account, Balance, Category, Merchant, TransactionRecord};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const FOOD_MERCHANT: &str = "PADARIA DO ZE               SAO PAULO BR";

    struct Fixture {
        store: Arc<InMemoryStore>,
        accounts: Arc<InMemoryAccountRepository>,
        coordinator: PaymentCoordinator,
        account_uid: Uuid,
    }

    fn balance(food: Decimal, meal: Decimal, cash: Decimal) -> Balance {
        let category = |id: u64, name: &str, amount: Decimal, mccs: &[&str], fallback: bool| Category {
            id,
            name: name.to_string(),
            amount,
            mcc_codes: mccs.iter().map(|m| m.to_string()).collect(),
            priority: id as u32,
            fallback,
        };
        Balance::new(vec![
            category(1, "FOOD", food, &["5411", "5412"], false),
            category(2, "MEAL", meal, &["5811", "5812"], false),
            category(3, "CASH", cash, &[], true),
        ])
        .unwrap()
    }

    async fn fixture(food: Decimal, meal: Decimal, cash: Decimal) -> Fixture {
        let store = InMemoryStore::start(64, Duration::from_millis(10));
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let merchants = Arc::new(InMemoryMerchantRepository::new());
        merchants.insert(Merchant::new(FOOD_MERCHANT, "5411"));

        let account_uid = Uuid::new_v4();
        accounts.insert(Account::new(1, account_uid, balance(food, meal, cash)));

        let coordinator = PaymentCoordinator::from_config(
            &AuthorizerConfig::default(),
            store.clone(),
            accounts.clone(),
            merchants,
        )
        .await
        .unwrap();

        Fixture {
            store,
            accounts,
            coordinator,
            account_uid,
        }
    }

    fn request(account_uid: Uuid, mcc: &str, merchant: &str, amount: Decimal) -> PaymentRequest {
        PaymentRequest {
            transaction_uid: Uuid::new_v4(),
            account_uid,
            mcc: mcc.to_string(),
            merchant: merchant.to_string(),
            amount,
        }
    }

    async fn amounts(f: &Fixture) -> (Decimal, Decimal, Decimal) {
        let account = f.accounts.find_by_uid(f.account_uid).await.unwrap();
        let amount = |id| account.balance.category(id).unwrap().amount;
        (amount(1), amount(2), amount(3))
    }

    async fn assert_unlocked(f: &Fixture) {
        assert_eq!(f.store.get(&account_lock_key(f.account_uid)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_matched_category_approves() {
        let f = fixture(dec!(205.11), dec!(110.22), dec!(115.33)).await;

        let result = f
            .coordinator
            .execute(request(f.account_uid, "5411", "UNKNOWN MERCHANT", dec!(100.10)))
            .await;

        assert_eq!(result, ExecutionResult::approved());
        assert_eq!(amounts(&f).await, (dec!(105.01), dec!(110.22), dec!(115.33)));
        assert_eq!(f.accounts.transactions(f.account_uid).len(), 1);
        assert_unlocked(&f).await;
    }

    #[tokio::test]
    async fn test_insufficient_total_is_51_and_changes_nothing() {
        let f = fixture(dec!(40.00), dec!(0), dec!(50.00)).await;

        let result = f
            .coordinator
            .execute(request(f.account_uid, "5411", "", dec!(100.00)))
            .await;

        assert_eq!(result.code, ResultCode::InsufficientFunds);
        assert_eq!(amounts(&f).await, (dec!(40.00), dec!(0), dec!(50.00)));
        assert!(f.accounts.transactions(f.account_uid).is_empty());
        assert_unlocked(&f).await;
    }

    #[tokio::test]
    async fn test_split_across_matched_and_fallback() {
        let f = fixture(dec!(40.00), dec!(0), dec!(80.00)).await;

        let result = f
            .coordinator
            .execute(request(f.account_uid, "5411", "", dec!(100.00)))
            .await;

        assert!(result.is_approved());
        let records: Vec<(u64, Decimal)> = f
            .accounts
            .transactions(f.account_uid)
            .iter()
            .map(|r: &TransactionRecord| (r.category_id, r.amount))
            .collect();
        assert_eq!(records, vec![(1, dec!(40.00)), (3, dec!(60.00))]);
        assert_eq!(amounts(&f).await, (dec!(0), dec!(0), dec!(20.00)));
    }

    #[tokio::test]
    async fn test_unknown_mcc_uses_fallback() {
        let f = fixture(dec!(205.11), dec!(110.22), dec!(115.33)).await;

        let result = f
            .coordinator
            .execute(request(f.account_uid, "7995", "", dec!(50.00)))
            .await;

        assert!(result.is_approved());
        assert_eq!(amounts(&f).await, (dec!(205.11), dec!(110.22), dec!(65.33)));
    }

    #[tokio::test]
    async fn test_known_merchant_overrides_request_mcc() {
        let f = fixture(dec!(100.00), dec!(100.00), dec!(100.00)).await;

        let result = f
            .coordinator
            .execute(request(f.account_uid, "5811", FOOD_MERCHANT, dec!(10.00)))
            .await;

        assert!(result.is_approved());
        assert_eq!(amounts(&f).await, (dec!(90.00), dec!(100.00), dec!(100.00)));
        assert_eq!(f.accounts.transactions(f.account_uid)[0].mcc, "5411");
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_without_lock() {
        let f = fixture(dec!(100), dec!(100), dec!(100)).await;
        let _held = f
            .store
            .set_if_absent(&account_lock_key(f.account_uid), "someone-else", Duration::from_secs(60))
            .await
            .unwrap();

        let result = f
            .coordinator
            .execute(request(f.account_uid, "54A1", "", dec!(10)))
            .await;

        assert_eq!(result.code, ResultCode::Rejected);
        assert!(matches!(result.error, Some(PaymentError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_unknown_account_is_07_and_unlocks() {
        let f = fixture(dec!(100), dec!(100), dec!(100)).await;
        let missing = Uuid::new_v4();

        let result = f.coordinator.execute(request(missing, "5411", "", dec!(10))).await;

        assert_eq!(result.code, ResultCode::Rejected);
        assert_eq!(result.error, Some(PaymentError::account_not_found(missing)));
        assert_eq!(f.store.get(&account_lock_key(missing)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_fallback_is_07_and_unlocks() {
        let store = InMemoryStore::start(64, Duration::from_millis(10));
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let account_uid = Uuid::new_v4();
        let food_only = Balance::new(vec![Category {
            id: 1,
            name: "FOOD".to_string(),
            amount: dec!(100),
            mcc_codes: ["5411".to_string()].into_iter().collect(),
            priority: 1,
            fallback: false,
        }])
        .unwrap();
        accounts.insert(Account::new(1, account_uid, food_only));
        let coordinator = PaymentCoordinator::from_config(
            &AuthorizerConfig::default(),
            store.clone(),
            accounts.clone(),
            Arc::new(InMemoryMerchantRepository::new()),
        )
        .await
        .unwrap();

        let result = coordinator.execute(request(account_uid, "7995", "", dec!(10))).await;

        assert_eq!(result.code, ResultCode::Rejected);
        assert!(matches!(result.error, Some(PaymentError::Configuration { .. })));
        let stored = accounts.find_by_uid(account_uid).await.unwrap();
        assert_eq!(stored.balance.amount_total(), dec!(100));
        assert_eq!(store.get(&account_lock_key(account_uid)).await.unwrap(), None);
    }

    struct FailingMerchants;

    #[async_trait]
    impl MerchantRepository for FailingMerchants {
        async fn find_by_name(&self, _: &str) -> Result<Option<Merchant>, PaymentError> {
            Err(PaymentError::repository("find merchant", "connection refused"))
        }
    }

    struct FailingSaves(InMemoryAccountRepository);

    #[async_trait]
    impl AccountRepository for FailingSaves {
        async fn find_by_uid(&self, uid: Uuid) -> Result<Account, PaymentError> {
            self.0.find_by_uid(uid).await
        }

        async fn save_transactions(&self, _: &[TransactionRecord]) -> Result<(), PaymentError> {
            Err(PaymentError::repository("save transactions", "disk full"))
        }
    }

    #[tokio::test]
    async fn test_merchant_lookup_failure_is_07_and_unlocks() {
        let store = InMemoryStore::start(64, Duration::from_millis(10));
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let account_uid = Uuid::new_v4();
        accounts.insert(Account::new(1, account_uid, balance(dec!(10), dec!(10), dec!(10))));
        let coordinator = PaymentCoordinator::from_config(
            &AuthorizerConfig::default(),
            store.clone(),
            accounts,
            Arc::new(FailingMerchants),
        )
        .await
        .unwrap();

        let result = coordinator
            .execute(request(account_uid, "5411", FOOD_MERCHANT, dec!(1)))
            .await;

        assert_eq!(result.code, ResultCode::Rejected);
        assert_eq!(store.get(&account_lock_key(account_uid)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persist_failure_is_07_and_unlocks() {
        let store = InMemoryStore::start(64, Duration::from_millis(10));
        let inner = InMemoryAccountRepository::new();
        let account_uid = Uuid::new_v4();
        inner.insert(Account::new(1, account_uid, balance(dec!(10), dec!(10), dec!(10))));
        let coordinator = PaymentCoordinator::from_config(
            &AuthorizerConfig::default(),
            store.clone(),
            Arc::new(FailingSaves(inner)),
            Arc::new(InMemoryMerchantRepository::new()),
        )
        .await
        .unwrap();

        let result = coordinator.execute(request(account_uid, "5411", "", dec!(1))).await;

        assert_eq!(result.code, ResultCode::Rejected);
        assert!(matches!(result.error, Some(PaymentError::Repository { .. })));
        assert_eq!(store.get(&account_lock_key(account_uid)).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_held_past_deadline_is_07() {
        let f = fixture(dec!(100), dec!(100), dec!(100)).await;
        f.store
            .set_if_absent(&account_lock_key(f.account_uid), "other", Duration::from_secs(60))
            .await
            .unwrap();

        let result = f
            .coordinator
            .execute(request(f.account_uid, "5411", "", dec!(10)))
            .await;

        assert_eq!(result.code, ResultCode::Rejected);
        assert!(matches!(result.error, Some(PaymentError::LockTimeout { .. })));
        assert_eq!(amounts(&f).await, (dec!(100), dec!(100), dec!(100)));
    }

    #[tokio::test]
    async fn test_cancelled_request_is_07() {
        let f = fixture(dec!(100), dec!(100), dec!(100)).await;
        let token = CancellationToken::new();
        token.cancel();

        let result = f
            .coordinator
            .execute_with_cancellation(request(f.account_uid, "5411", "", dec!(10)), token)
            .await;

        assert_eq!(result.code, ResultCode::Rejected);
        assert!(matches!(result.error, Some(PaymentError::Cancelled { .. })));
        assert_unlocked(&f).await;
    }
}
