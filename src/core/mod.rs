//! Core authorization logic
//!
//! This module contains the authorization components, leaf first:
//! - `traits` - Repository and coordination store contracts
//! - `allocator` - Pure category allocation
//! - `context` - Request-scoped deadline and cancellation
//! - `event_bus` - Keyed fan-out of store expiry notifications
//! - `lock_manager` - Per-account distributed lock
//! - `merchant_cache` - Cache-aside merchant lookup
//! - `coordinator` - The authorization state machine
//! - `batch_processor` - Account-partitioned concurrent batches

pub mod allocator;
pub mod batch_processor;
pub mod context;
pub mod coordinator;
pub mod event_bus;
pub mod lock_manager;
pub mod merchant_cache;
pub mod traits;

pub use allocator::allocate;
pub use batch_processor::{BatchProcessor, ProcessingResult, RequestRow, SequencedRequest};
pub use context::RequestContext;
pub use coordinator::{CoordinatorState, ExecutionResult, PaymentCoordinator};
pub use event_bus::{ExpiryEventBus, Subscription};
pub use lock_manager::{account_lock_key, DistributedLockManager, LockGuard, LockHolder};
pub use merchant_cache::{merchant_cache_key, CachedMerchantRepository};
pub use traits::{AccountRepository, CoordinationStore, MerchantRepository};
