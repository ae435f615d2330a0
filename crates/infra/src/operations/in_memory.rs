//! In-memory operation store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use folio_core::OperationId;
use folio_moderation::{
    FailureDisposition, NewOperation, OperationStatus, RetryOperation, RetryPolicy,
};

use super::store::{OperationStats, OperationStore, OperationStoreError};

/// In-memory operation store for tests/dev.
#[derive(Debug)]
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<OperationId, RetryOperation>>,
    policy: RetryPolicy,
}

impl InMemoryOperationStore {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn arc(policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self::new(policy))
    }

    /// Force an operation due immediately (test helper).
    pub fn make_due_now(&self, id: OperationId) {
        let mut ops = self.operations.write().unwrap();
        if let Some(op) = ops.get_mut(&id) {
            op.next_retry_at = Utc::now();
        }
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn enqueue(&self, new: NewOperation) -> Result<OperationId, OperationStoreError> {
        let op = RetryOperation::create(new, &self.policy)?;
        let id = op.id;
        self.operations.write().unwrap().insert(id, op);
        Ok(id)
    }

    async fn fetch_due(&self, limit: usize) -> Result<Vec<RetryOperation>, OperationStoreError> {
        let mut ops = self.operations.write().unwrap();
        let now = Utc::now();

        let mut due: Vec<OperationId> = ops
            .values()
            .filter(|op| op.is_due(now))
            .map(|op| op.id)
            .collect();

        // priority DESC, created_at ASC
        due.sort_by(|a, b| {
            let (a, b) = (&ops[a], &ops[b]);
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(op) = ops.get_mut(&id) {
                op.mark_processing();
                claimed.push(op.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(
        &self,
        id: OperationId,
        result: Option<String>,
    ) -> Result<(), OperationStoreError> {
        let mut ops = self.operations.write().unwrap();
        let op = ops.get_mut(&id).ok_or(OperationStoreError::NotFound(id))?;
        if op.status.is_terminal() {
            return Ok(());
        }
        op.mark_completed(result);
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<FailureDisposition, OperationStoreError> {
        let mut ops = self.operations.write().unwrap();
        let op = ops.get_mut(&id).ok_or(OperationStoreError::NotFound(id))?;
        if op.status.is_terminal() {
            return Err(OperationStoreError::Storage(format!(
                "operation {id} is already terminal"
            )));
        }
        Ok(op.record_failure(error, &self.policy))
    }

    async fn fail_permanent(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<(), OperationStoreError> {
        let mut ops = self.operations.write().unwrap();
        let op = ops.get_mut(&id).ok_or(OperationStoreError::NotFound(id))?;
        if !op.status.is_terminal() {
            op.fail_permanent(error);
        }
        Ok(())
    }

    async fn release(&self, id: OperationId) -> Result<(), OperationStoreError> {
        let mut ops = self.operations.write().unwrap();
        let op = ops.get_mut(&id).ok_or(OperationStoreError::NotFound(id))?;
        if op.status == OperationStatus::Processing {
            op.status = OperationStatus::Pending;
            op.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, id: OperationId) -> Result<Option<RetryOperation>, OperationStoreError> {
        Ok(self.operations.read().unwrap().get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<OperationStatus>,
        limit: usize,
    ) -> Result<Vec<RetryOperation>, OperationStoreError> {
        let ops = self.operations.read().unwrap();
        let mut result: Vec<_> = ops
            .values()
            .filter(|op| status.map_or(true, |s| op.status == s))
            .cloned()
            .collect();
        result.sort_by_key(|op| op.created_at);
        result.truncate(limit);
        Ok(result)
    }

    async fn purge_terminal(&self, older_than_days: u32) -> Result<u64, OperationStoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days as i64);
        let mut ops = self.operations.write().unwrap();
        let before = ops.len();
        ops.retain(|_, op| {
            !(op.status.is_terminal() && op.completed_at.map_or(false, |at| at < cutoff))
        });
        Ok((before - ops.len()) as u64)
    }

    async fn stats(&self) -> Result<OperationStats, OperationStoreError> {
        let ops = self.operations.read().unwrap();
        let mut stats = OperationStats::default();
        let mut retry_sum = 0u64;

        for op in ops.values() {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Processing => stats.processing += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
            retry_sum += op.retry_count as u64;
        }

        let total = stats.total();
        stats.avg_retry_count = if total == 0 {
            0.0
        } else {
            retry_sum as f64 / total as f64
        };
        let terminal = stats.completed + stats.failed;
        stats.success_rate = if terminal == 0 {
            1.0
        } else {
            stats.completed as f64 / terminal as f64
        };
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::TrackingId;
    use folio_moderation::OperationKind;
    use std::time::Duration;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(0),
            ..RetryPolicy::default()
        }
        .without_jitter()
    }

    fn webhook_op(priority: i32) -> NewOperation {
        NewOperation::new(OperationKind::WebhookNotification {
            url: "https://example.com/hook".to_string(),
            payload: serde_json::json!({"event": "test"}),
            secret: "s".to_string(),
        })
        .with_tracking_id(TrackingId::new("trk-1").unwrap())
        .with_priority(priority)
    }

    #[tokio::test]
    async fn fetch_due_claims_and_orders_by_priority() {
        let store = InMemoryOperationStore::new(test_policy());

        let low = store.enqueue(webhook_op(0)).await.unwrap();
        let high = store.enqueue(webhook_op(10)).await.unwrap();

        let due = store.fetch_due(10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, high);
        assert_eq!(due[1].id, low);
        assert!(due.iter().all(|op| op.status == OperationStatus::Processing));

        // Claimed rows are not handed out twice.
        assert!(store.fetch_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let store = InMemoryOperationStore::new(test_policy());
        let id = store.enqueue(webhook_op(0)).await.unwrap();

        store.mark_completed(id, Some("ok".to_string())).await.unwrap();
        // Second call must be a no-op, not an error.
        store.mark_completed(id, Some("again".to_string())).await.unwrap();

        let op = store.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn exhausted_operation_is_never_due_again() {
        let store = InMemoryOperationStore::new(test_policy());
        let id = store.enqueue(webhook_op(0)).await.unwrap();

        for _ in 0..3 {
            let due = store.fetch_due(1).await.unwrap();
            assert_eq!(due.len(), 1);
            store.schedule_retry(id, "boom").await.unwrap();
            store.make_due_now(id);
        }

        let op = store.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 3);
        assert!(op.final_error.is_some());
        assert!(store.fetch_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_returns_claim_without_counting() {
        let store = InMemoryOperationStore::new(test_policy());
        let id = store.enqueue(webhook_op(0)).await.unwrap();

        let due = store.fetch_due(1).await.unwrap();
        assert_eq!(due.len(), 1);
        store.release(id).await.unwrap();

        let op = store.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(store.fetch_due(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_old_terminal_rows_only() {
        let store = InMemoryOperationStore::new(test_policy());
        let done = store.enqueue(webhook_op(0)).await.unwrap();
        let pending = store.enqueue(webhook_op(0)).await.unwrap();
        store.mark_completed(done, None).await.unwrap();

        // Backdate the completion past the retention window.
        {
            let mut ops = store.operations.write().unwrap();
            ops.get_mut(&done).unwrap().completed_at =
                Some(Utc::now() - chrono::Duration::days(8));
        }

        let purged = store.purge_terminal(7).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(done).await.unwrap().is_none());
        assert!(store.get(pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_reflect_status_counts() {
        let store = InMemoryOperationStore::new(test_policy());
        let a = store.enqueue(webhook_op(0)).await.unwrap();
        let _b = store.enqueue(webhook_op(0)).await.unwrap();
        store.mark_completed(a, None).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total(), 2);
        assert_eq!(stats.success_rate, 1.0);
    }
}
