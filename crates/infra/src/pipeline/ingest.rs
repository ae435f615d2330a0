//! Inbound moderation callback ingestion.
//!
//! State machine per callback: `Pending -> Processing -> Completed` or, on a
//! pre-commit failure, back to `Pending` with a `CallbackRetry` operation
//! scheduled, until retries are exhausted and the callback is `Failed` and
//! escalated.

use std::sync::Arc;

use tracing::{error, info, warn};

use folio_moderation::callback::CallbackCompletion;
use folio_moderation::{
    CallbackPayload, CallbackRecord, CallbackStatus, MediaItem, ModerationUpdate, NewOperation,
    OperationKind, RetryPolicy, ValidatedCallback,
};

use crate::callbacks::CallbackStore;
use crate::media::MediaStore;
use crate::operations::OperationStore;
use crate::storage::{FileMover, MoveRequest};

/// Priority for rescheduled callback ingestions: user-visible media state
/// should settle before housekeeping operations run.
const CALLBACK_RETRY_PRIORITY: i32 = 10;

/// Why a callback was rejected without scheduling a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Malformed payload; a sender bug.
    InvalidPayload,
    /// No media rows match the correlation keys (stale or duplicate).
    NoMatchingMedia,
    /// The batch is already settled with a conflicting outcome.
    Conflict,
}

/// Result of one ingestion attempt. Failures are folded in here; this call
/// never propagates an error to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Media rows were updated and the callback is Completed.
    Applied { updated_media: u64 },
    /// The callback was already Completed; nothing was re-applied.
    AlreadyProcessed,
    /// Non-retryable rejection. No retry was scheduled.
    Rejected { reason: RejectReason, error: String },
    /// Transient failure. `will_retry` says whether another attempt is
    /// coming (scheduled here or via the operation that carried us).
    Deferred { error: String, will_retry: bool },
}

impl IngestOutcome {
    pub fn success(&self) -> bool {
        matches!(
            self,
            IngestOutcome::Applied { .. } | IngestOutcome::AlreadyProcessed
        )
    }

    pub fn updated_media(&self) -> u64 {
        match self {
            IngestOutcome::Applied { updated_media } => *updated_media,
            _ => 0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            IngestOutcome::Rejected { error, .. } | IngestOutcome::Deferred { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}

/// Applies inbound moderation callbacks to media rows.
pub struct CallbackIngestor {
    callbacks: Arc<dyn CallbackStore>,
    media: Arc<dyn MediaStore>,
    operations: Arc<dyn OperationStore>,
    mover: Arc<dyn FileMover>,
    policy: RetryPolicy,
}

impl CallbackIngestor {
    pub fn new(
        callbacks: Arc<dyn CallbackStore>,
        media: Arc<dyn MediaStore>,
        operations: Arc<dyn OperationStore>,
        mover: Arc<dyn FileMover>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            callbacks,
            media,
            operations,
            mover,
            policy,
        }
    }

    /// Ingest a freshly delivered callback. Transient failures schedule a
    /// `CallbackRetry` operation.
    pub async fn ingest(&self, payload: CallbackPayload) -> IngestOutcome {
        self.ingest_inner(payload, true).await
    }

    /// Re-run ingestion from a claimed `CallbackRetry` operation. Transient
    /// failures are reported back so the runner reschedules the existing
    /// operation instead of enqueueing a duplicate.
    pub async fn reingest(&self, payload: CallbackPayload) -> IngestOutcome {
        self.ingest_inner(payload, false).await
    }

    async fn ingest_inner(&self, payload: CallbackPayload, schedule_retries: bool) -> IngestOutcome {
        let valid = match payload.validate() {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "rejected invalid moderation callback");
                return IngestOutcome::Rejected {
                    reason: RejectReason::InvalidPayload,
                    error: e.to_string(),
                };
            }
        };

        let existing = match self
            .callbacks
            .find(valid.tracking_id.as_ref(), valid.batch_id.as_ref())
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, "callback lookup failed");
                return IngestOutcome::Deferred {
                    error: e.to_string(),
                    will_retry: false,
                };
            }
        };

        if let Some(record) = &existing {
            if record.status == CallbackStatus::Completed {
                info!(
                    tracking_id = ?valid.tracking_id,
                    batch_id = ?valid.batch_id,
                    "callback already processed"
                );
                return IngestOutcome::AlreadyProcessed;
            }
        }

        let mut record = existing
            .unwrap_or_else(|| CallbackRecord::new(&valid, payload.clone(), self.policy.max_retries));
        record.mark_processing();
        if let Err(e) = self.callbacks.upsert(&record).await {
            error!(error = %e, "failed to persist callback state");
            return IngestOutcome::Deferred {
                error: e.to_string(),
                will_retry: false,
            };
        }

        let media_rows = match self
            .media
            .find_by_correlation(valid.tracking_id.as_ref(), valid.batch_id.as_ref())
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                return self
                    .transient_failure(&mut record, &valid, e.to_string(), schedule_retries)
                    .await;
            }
        };

        if media_rows.is_empty() {
            let error = "no media rows match callback (stale or duplicate)".to_string();
            warn!(
                tracking_id = ?valid.tracking_id,
                batch_id = ?valid.batch_id,
                "{error}"
            );
            record.fail_permanent(error.as_str());
            self.persist_record(&record).await;
            return IngestOutcome::Rejected {
                reason: RejectReason::NoMatchingMedia,
                error,
            };
        }

        let update = ModerationUpdate::from_callback(&valid);
        let updated = match self
            .media
            .apply_moderation(valid.tracking_id.as_ref(), valid.batch_id.as_ref(), &update)
            .await
        {
            Ok(updated) => updated,
            Err(e) if e.is_transient() => {
                return self
                    .transient_failure(&mut record, &valid, e.to_string(), schedule_retries)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "callback rejected by media store");
                record.fail_permanent(e.to_string());
                self.persist_record(&record).await;
                return IngestOutcome::Rejected {
                    reason: RejectReason::Conflict,
                    error: e.to_string(),
                };
            }
        };

        // Status is committed; file moves are best-effort from here on. A
        // mover failure becomes a FileStorageMove retry, never a rollback.
        if valid.status.is_resolved() {
            self.trigger_moves(&valid, &media_rows).await;
        }

        record.mark_completed(CallbackCompletion {
            status: valid.status,
            updated_media: updated as usize,
            policy_violations: valid.policy_violations.clone(),
            completed_at: chrono::Utc::now(),
        });
        self.persist_record(&record).await;

        info!(
            tracking_id = ?valid.tracking_id,
            batch_id = ?valid.batch_id,
            status = %valid.status,
            updated_media = updated,
            "moderation callback applied"
        );
        IngestOutcome::Applied {
            updated_media: updated,
        }
    }

    async fn transient_failure(
        &self,
        record: &mut CallbackRecord,
        valid: &ValidatedCallback,
        error: String,
        schedule_retries: bool,
    ) -> IngestOutcome {
        warn!(
            tracking_id = ?valid.tracking_id,
            batch_id = ?valid.batch_id,
            attempt = record.retry_count,
            error = %error,
            "callback ingestion failed"
        );

        let retry_allowed = record.record_failure(error.as_str());
        self.persist_record(record).await;

        if !retry_allowed {
            error!(
                tracking_id = ?valid.tracking_id,
                batch_id = ?valid.batch_id,
                attempts = record.retry_count,
                error = %error,
                "callback ingestion exhausted retries; flagged for manual review"
            );
            return IngestOutcome::Deferred {
                error,
                will_retry: false,
            };
        }

        if !schedule_retries {
            // The CallbackRetry operation that carried us is rescheduled by
            // the runner.
            return IngestOutcome::Deferred {
                error,
                will_retry: true,
            };
        }

        let mut new_op = NewOperation::new(OperationKind::CallbackRetry {
            payload: record.payload.clone(),
        })
        .with_priority(CALLBACK_RETRY_PRIORITY);
        if let Some(t) = &valid.tracking_id {
            new_op = new_op.with_tracking_id(t.clone());
        }
        if let Some(b) = &valid.batch_id {
            new_op = new_op.with_batch_id(b.clone());
        }

        match self.operations.enqueue(new_op).await {
            Ok(id) => {
                info!(operation_id = %id, "scheduled callback retry");
                IngestOutcome::Deferred {
                    error,
                    will_retry: true,
                }
            }
            Err(e) => {
                // Never swallow a failed schedule write.
                error!(error = %e, "failed to schedule callback retry");
                IngestOutcome::Deferred {
                    error: format!("{error}; retry scheduling failed: {e}"),
                    will_retry: false,
                }
            }
        }
    }

    async fn trigger_moves(&self, valid: &ValidatedCallback, media_rows: &[MediaItem]) {
        for media in media_rows {
            let request = MoveRequest {
                model_slug: media.model_slug.clone(),
                media_id: media.id,
                file_name: media.file_name.clone(),
                thumb_name: media.thumb_name.clone(),
                target_status: valid.status,
            };
            if let Err(e) = self.mover.move_media(&request).await {
                warn!(media_id = %media.id, error = %e, "file move failed; scheduling retry");

                let mut new_op = NewOperation::new(OperationKind::FileStorageMove {
                    model_slug: media.model_slug.clone(),
                    media_id: media.id,
                    file_name: media.file_name.clone(),
                    thumb_name: media.thumb_name.clone(),
                    target_status: valid.status,
                })
                .with_model_slug(media.model_slug.clone())
                .with_media_id(media.id);
                if let Some(t) = &valid.tracking_id {
                    new_op = new_op.with_tracking_id(t.clone());
                }
                if let Some(b) = &valid.batch_id {
                    new_op = new_op.with_batch_id(b.clone());
                }

                if let Err(e) = self.operations.enqueue(new_op).await {
                    error!(media_id = %media.id, error = %e, "failed to schedule file move retry");
                }
            }
        }
    }

    async fn persist_record(&self, record: &CallbackRecord) {
        if let Err(e) = self.callbacks.upsert(record).await {
            error!(error = %e, "failed to persist callback state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use folio_core::{BatchId, MediaId, ModelSlug, TrackingId};
    use folio_moderation::{ModerationStatus, OperationStatus};

    use crate::callbacks::InMemoryCallbackStore;
    use crate::media::{InMemoryMediaStore, MediaStoreError};
    use crate::operations::InMemoryOperationStore;
    use crate::pipeline::testing::RecordingMover;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: std::time::Duration::ZERO,
            ..RetryPolicy::default()
        }
        .without_jitter()
    }

    fn approved_payload(batch: &str) -> CallbackPayload {
        CallbackPayload {
            moderation_status: "approved".to_string(),
            moderation_tracking_id: None,
            batch_id: Some(batch.to_string()),
            moderation_score: Some(12.5),
            confidence: Some(97.0),
            risk_level: None,
            detected_parts: None,
            face_analysis: None,
            human_review_required: None,
            policy_violations: None,
        }
    }

    struct Fixture {
        callbacks: Arc<InMemoryCallbackStore>,
        media: Arc<InMemoryMediaStore>,
        operations: Arc<InMemoryOperationStore>,
        mover: Arc<RecordingMover>,
    }

    impl Fixture {
        fn new(mover: RecordingMover) -> Self {
            Self {
                callbacks: InMemoryCallbackStore::arc(),
                media: InMemoryMediaStore::arc(),
                operations: InMemoryOperationStore::arc(policy()),
                mover: Arc::new(mover),
            }
        }

        fn ingestor(&self) -> CallbackIngestor {
            self.ingestor_with_media(self.media.clone())
        }

        fn ingestor_with_media(&self, media: Arc<dyn MediaStore>) -> CallbackIngestor {
            CallbackIngestor::new(
                self.callbacks.clone(),
                media,
                self.operations.clone(),
                self.mover.clone(),
                policy(),
            )
        }

        async fn seed_batch(&self, batch: &str, n: usize) {
            let slug = ModelSlug::new("ava").unwrap();
            for i in 0..n {
                let media = folio_moderation::MediaItem::new(slug.clone(), format!("p{i}.jpg"))
                    .with_thumb(format!("p{i}_thumb.jpg"))
                    .with_batch_id(BatchId::new(batch).unwrap());
                self.media.insert(&media).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn approved_batch_updates_all_rows_and_triggers_moves() {
        let fixture = Fixture::new(RecordingMover::default());
        fixture.seed_batch("B1", 3).await;
        let ingestor = fixture.ingestor();

        let outcome = ingestor.ingest(approved_payload("B1")).await;
        assert_eq!(outcome, IngestOutcome::Applied { updated_media: 3 });

        let batch = BatchId::new("B1").unwrap();
        let rows = fixture
            .media
            .find_by_correlation(None, Some(&batch))
            .await
            .unwrap();
        assert!(rows
            .iter()
            .all(|m| m.moderation_status == ModerationStatus::Approved));
        assert_eq!(fixture.mover.request_count(), 3);

        let record = fixture
            .callbacks
            .find(None, Some(&batch))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, CallbackStatus::Completed);
        assert_eq!(record.completion.as_ref().unwrap().updated_media, 3);
    }

    #[tokio::test]
    async fn missing_correlation_is_rejected_without_an_operation() {
        let fixture = Fixture::new(RecordingMover::default());
        let ingestor = fixture.ingestor();

        let mut payload = approved_payload("B1");
        payload.batch_id = None;
        let outcome = ingestor.ingest(payload).await;

        assert!(matches!(outcome, IngestOutcome::Rejected { .. }));
        assert!(fixture.operations.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reingesting_a_completed_callback_is_a_noop() {
        let fixture = Fixture::new(RecordingMover::default());
        fixture.seed_batch("B1", 2).await;
        let ingestor = fixture.ingestor();

        let first = ingestor.ingest(approved_payload("B1")).await;
        assert_eq!(first, IngestOutcome::Applied { updated_media: 2 });
        assert_eq!(fixture.mover.request_count(), 2);

        let second = ingestor.ingest(approved_payload("B1")).await;
        assert_eq!(second, IngestOutcome::AlreadyProcessed);
        assert!(second.success());
        assert_eq!(second.updated_media(), 0);
        // No second round of moves either.
        assert_eq!(fixture.mover.request_count(), 2);
    }

    #[tokio::test]
    async fn zero_matching_media_fails_the_callback_permanently() {
        let fixture = Fixture::new(RecordingMover::default());
        let ingestor = fixture.ingestor();

        let outcome = ingestor.ingest(approved_payload("stale-batch")).await;
        assert!(matches!(outcome, IngestOutcome::Rejected { .. }));

        let batch = BatchId::new("stale-batch").unwrap();
        let record = fixture
            .callbacks
            .find(None, Some(&batch))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, CallbackStatus::Failed);
        assert!(fixture.operations.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mover_failure_schedules_file_move_retries() {
        let fixture = Fixture::new(RecordingMover::failing());
        fixture.seed_batch("B1", 2).await;
        let ingestor = fixture.ingestor();

        // The status update commits even though every move failed.
        let outcome = ingestor.ingest(approved_payload("B1")).await;
        assert_eq!(outcome, IngestOutcome::Applied { updated_media: 2 });

        let ops = fixture.operations.list(None, 10).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops
            .iter()
            .all(|op| matches!(op.kind, OperationKind::FileStorageMove { .. })));
        assert!(ops.iter().all(|op| op.status == OperationStatus::Pending));
    }

    /// Media store that fails `apply_moderation` while the flag is up.
    struct FlakyMediaStore {
        inner: Arc<InMemoryMediaStore>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl MediaStore for FlakyMediaStore {
        async fn insert(&self, media: &folio_moderation::MediaItem) -> Result<(), MediaStoreError> {
            self.inner.insert(media).await
        }

        async fn get(
            &self,
            id: MediaId,
        ) -> Result<Option<folio_moderation::MediaItem>, MediaStoreError> {
            self.inner.get(id).await
        }

        async fn find_by_correlation(
            &self,
            tracking_id: Option<&TrackingId>,
            batch_id: Option<&BatchId>,
        ) -> Result<Vec<folio_moderation::MediaItem>, MediaStoreError> {
            self.inner.find_by_correlation(tracking_id, batch_id).await
        }

        async fn apply_moderation(
            &self,
            tracking_id: Option<&TrackingId>,
            batch_id: Option<&BatchId>,
            update: &ModerationUpdate,
        ) -> Result<u64, MediaStoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MediaStoreError::Storage("connection reset".to_string()));
            }
            self.inner.apply_moderation(tracking_id, batch_id, update).await
        }
    }

    #[tokio::test]
    async fn transient_failure_schedules_a_callback_retry() {
        let fixture = Fixture::new(RecordingMover::default());
        fixture.seed_batch("B1", 1).await;

        let flaky = Arc::new(FlakyMediaStore {
            inner: fixture.media.clone(),
            failing: AtomicBool::new(true),
        });
        let ingestor = fixture.ingestor_with_media(flaky.clone());

        let outcome = ingestor.ingest(approved_payload("B1")).await;
        assert_eq!(
            outcome,
            IngestOutcome::Deferred {
                error: "storage error: connection reset".to_string(),
                will_retry: true,
            }
        );

        let ops = fixture.operations.list(None, 10).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].kind, OperationKind::CallbackRetry { .. }));
        assert_eq!(ops[0].priority, 10);

        // Downstream recovers; the re-run applies and completes the callback.
        flaky.failing.store(false, Ordering::SeqCst);
        let OperationKind::CallbackRetry { payload } = &ops[0].kind else {
            unreachable!()
        };
        let outcome = ingestor.reingest(payload.clone()).await;
        assert_eq!(outcome, IngestOutcome::Applied { updated_media: 1 });
    }

    #[tokio::test]
    async fn reingest_does_not_enqueue_duplicate_retries() {
        let fixture = Fixture::new(RecordingMover::default());
        fixture.seed_batch("B1", 1).await;

        let flaky = Arc::new(FlakyMediaStore {
            inner: fixture.media.clone(),
            failing: AtomicBool::new(true),
        });
        let ingestor = fixture.ingestor_with_media(flaky);

        let outcome = ingestor.reingest(approved_payload("B1")).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Deferred {
                will_retry: true,
                ..
            }
        ));
        assert!(fixture.operations.list(None, 10).await.unwrap().is_empty());
    }
}
