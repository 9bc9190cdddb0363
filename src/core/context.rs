//! Request-scoped context
//!
//! Carries the identifiers of the request being authorized, its deadline and its
//! cancellation token. Passed by reference through the coordinator and the lock
//! manager; every suspension point is bounded by it.

use crate::types::{PaymentError, PaymentRequest};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Request-scoped values for one payment authorization
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Transaction UID of the request
    pub transaction_uid: Uuid,

    /// Account UID of the request
    pub account_uid: Uuid,

    started_at: Instant,
    deadline: Instant,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a context whose deadline is `timeout` from now
    pub fn new(request: &PaymentRequest, timeout: Duration) -> Self {
        Self::with_cancellation(request, timeout, CancellationToken::new())
    }

    /// Create a context bound to a caller-supplied cancellation token
    pub fn with_cancellation(
        request: &PaymentRequest,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        let started_at = Instant::now();
        Self {
            transaction_uid: request.transaction_uid,
            account_uid: request.account_uid,
            started_at,
            deadline: started_at + timeout,
            cancellation,
        }
    }

    /// Instant after which every pending step is abandoned
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancellation token shared with the caller
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Milliseconds elapsed since the context was created
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Run a downstream call bounded by the deadline and the cancellation token
    ///
    /// # Returns
    ///
    /// * The call's own result if it finishes first
    /// * `Err(PaymentError::DeadlineExceeded)` if the deadline elapses first
    /// * `Err(PaymentError::Cancelled)` if the token fires first
    pub async fn guard<T, F>(&self, operation: &str, call: F) -> Result<T, PaymentError>
    where
        F: Future<Output = Result<T, PaymentError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(PaymentError::cancelled(operation)),
            _ = tokio::time::sleep_until(self.deadline) => Err(PaymentError::deadline_exceeded(operation)),
            result = call => result,
        }
    }
}
