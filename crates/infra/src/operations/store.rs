//! Operation store abstraction.

use async_trait::async_trait;

use folio_core::{DomainError, OperationId};
use folio_moderation::{FailureDisposition, NewOperation, OperationStatus, RetryOperation};

/// Operation store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OperationStoreError {
    #[error("operation not found: {0}")]
    NotFound(OperationId),
    #[error(transparent)]
    Validation(#[from] DomainError),
    /// A stored row could not be decoded (e.g. an unrecognized operation
    /// kind written by a newer/older deploy). Configuration bug, not
    /// retryable.
    #[error("corrupt operation row {id}: {detail}")]
    CorruptRow { id: OperationId, detail: String },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Aggregate counts exposed to administrators.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OperationStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_retry_count: f64,
    /// completed / (completed + failed); 1.0 when nothing is terminal yet.
    pub success_rate: f64,
}

impl OperationStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Durable store for retryable operations.
///
/// Implementations must serialize concurrent status transitions on the same
/// row: `fetch_due` claims, `mark_completed` is idempotent, and
/// `schedule_retry` acts on the claimed row only.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persist a new Pending operation. Validates that a correlation key is
    /// present and schedules the first attempt one initial delay from now.
    async fn enqueue(&self, new: NewOperation) -> Result<OperationId, OperationStoreError>;

    /// Claim up to `limit` due operations (Pending, `next_retry_at <= now`,
    /// retries not exhausted), ordered by priority descending then creation
    /// ascending. Returned rows are already flipped to Processing.
    async fn fetch_due(&self, limit: usize) -> Result<Vec<RetryOperation>, OperationStoreError>;

    /// Complete an operation. Calling twice is a no-op on the second call.
    async fn mark_completed(
        &self,
        id: OperationId,
        result: Option<String>,
    ) -> Result<(), OperationStoreError>;

    /// Record a failed attempt: increments the retry count and either
    /// reschedules with backoff or transitions to Failed when exhausted.
    async fn schedule_retry(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<FailureDisposition, OperationStoreError>;

    /// Terminal failure without a retry (validation/config errors).
    async fn fail_permanent(&self, id: OperationId, error: &str)
        -> Result<(), OperationStoreError>;

    /// Return a claimed-but-unprocessed operation to Pending without
    /// touching its retry count.
    async fn release(&self, id: OperationId) -> Result<(), OperationStoreError>;

    async fn get(&self, id: OperationId) -> Result<Option<RetryOperation>, OperationStoreError>;

    async fn list(
        &self,
        status: Option<OperationStatus>,
        limit: usize,
    ) -> Result<Vec<RetryOperation>, OperationStoreError>;

    /// Delete terminal rows past the retention window. Returns rows removed.
    async fn purge_terminal(&self, older_than_days: u32) -> Result<u64, OperationStoreError>;

    async fn stats(&self) -> Result<OperationStats, OperationStoreError>;
}
