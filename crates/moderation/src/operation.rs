//! Retryable pipeline operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use folio_core::{BatchId, DomainError, MediaId, ModelSlug, OperationId, TrackingId};

use crate::backoff::RetryPolicy;
use crate::callback::CallbackPayload;
use crate::status::ModerationStatus;

/// The closed set of retryable operations, each with its own typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Resubmit a file to the external moderation service.
    UploadRetry {
        model_slug: ModelSlug,
        media_id: MediaId,
        file_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_type: Option<String>,
    },
    /// Re-run callback ingestion against a stored callback body.
    CallbackRetry { payload: CallbackPayload },
    /// Re-attempt moving a media file between lifecycle folders.
    FileStorageMove {
        model_slug: ModelSlug,
        media_id: MediaId,
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumb_name: Option<String>,
        target_status: ModerationStatus,
    },
    /// Re-POST a stored payload to a stored webhook URL.
    WebhookNotification {
        url: String,
        payload: serde_json::Value,
        secret: String,
    },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::UploadRetry { .. } => "upload_retry",
            OperationKind::CallbackRetry { .. } => "callback_retry",
            OperationKind::FileStorageMove { .. } => "file_storage_move",
            OperationKind::WebhookNotification { .. } => "webhook_notification",
        }
    }
}

/// Operation lifecycle status.
///
/// `Processing` is the store-level claim state: a fetched-due row is flipped
/// to Processing in the same statement that returns it, so two runner
/// processes can never both hold the same operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }
}

impl core::str::FromStr for OperationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "processing" => Ok(OperationStatus::Processing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown operation status: {other}"
            ))),
        }
    }
}

/// Parameters for enqueueing a new operation.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub tracking_id: Option<TrackingId>,
    pub batch_id: Option<BatchId>,
    pub model_slug: Option<ModelSlug>,
    pub media_id: Option<MediaId>,
    pub priority: i32,
    /// Overrides the policy default when set.
    pub max_retries: Option<u32>,
}

impl NewOperation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            tracking_id: None,
            batch_id: None,
            model_slug: None,
            media_id: None,
            priority: 0,
            max_retries: None,
        }
    }

    pub fn with_tracking_id(mut self, tracking_id: TrackingId) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }

    pub fn with_batch_id(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_model_slug(mut self, model_slug: ModelSlug) -> Self {
        self.model_slug = Some(model_slug);
        self
    }

    pub fn with_media_id(mut self, media_id: MediaId) -> Self {
        self.media_id = Some(media_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// At least one correlation key must link the operation back to media.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.tracking_id.is_none() && self.batch_id.is_none() {
            return Err(DomainError::validation(
                "operation requires a tracking_id or batch_id",
            ));
        }
        Ok(())
    }
}

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// Another attempt is scheduled for the given time.
    Rescheduled(DateTime<Utc>),
    /// Retries exhausted; the operation is now terminally Failed.
    Exhausted,
}

/// A durable retryable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub tracking_id: Option<TrackingId>,
    pub batch_id: Option<BatchId>,
    pub model_slug: Option<ModelSlug>,
    pub media_id: Option<MediaId>,
    /// Failed attempts so far; 0 until the first failure is recorded.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Eligible for dispatch only once `now >= next_retry_at`.
    pub next_retry_at: DateTime<Utc>,
    /// Ordering hint among due operations; ties broken oldest-first.
    pub priority: i32,
    pub status: OperationStatus,
    pub last_error: Option<String>,
    pub final_error: Option<String>,
    /// Free-form result recorded on completion (diagnostics only).
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RetryOperation {
    /// Build a Pending operation from enqueue parameters.
    pub fn create(new: NewOperation, policy: &RetryPolicy) -> Result<Self, DomainError> {
        new.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: OperationId::new(),
            kind: new.kind,
            tracking_id: new.tracking_id,
            batch_id: new.batch_id,
            model_slug: new.model_slug,
            media_id: new.media_id,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(policy.max_retries),
            next_retry_at: now
                + chrono::Duration::from_std(policy.next_delay(0)).unwrap_or_default(),
            priority: new.priority,
            status: OperationStatus::Pending,
            last_error: None,
            final_error: None,
            result: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending
            && self.next_retry_at <= now
            && self.retry_count < self.max_retries
    }

    pub fn mark_processing(&mut self) {
        self.status = OperationStatus::Processing;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self, result: Option<String>) {
        let now = Utc::now();
        self.status = OperationStatus::Completed;
        self.result = result;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed attempt: reschedule with backoff, or exhaust.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        policy: &RetryPolicy,
    ) -> FailureDisposition {
        let error = error.into();
        self.retry_count += 1;
        self.updated_at = Utc::now();
        self.last_error = Some(error.clone());

        if self.retry_count >= self.max_retries {
            self.status = OperationStatus::Failed;
            self.final_error = Some(error);
            self.completed_at = Some(self.updated_at);
            FailureDisposition::Exhausted
        } else {
            let next = policy.next_retry_at(self.retry_count);
            self.next_retry_at = next;
            self.status = OperationStatus::Pending;
            FailureDisposition::Rescheduled(next)
        }
    }

    /// Terminal failure without retry (validation errors, config bugs).
    pub fn fail_permanent(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.status = OperationStatus::Failed;
        self.final_error = Some(error.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn webhook_op() -> NewOperation {
        NewOperation::new(OperationKind::WebhookNotification {
            url: "https://example.com/hook".to_string(),
            payload: serde_json::json!({"event": "media.approved"}),
            secret: "shh".to_string(),
        })
        .with_tracking_id(TrackingId::new("trk-1").unwrap())
    }

    #[test]
    fn create_requires_correlation_key() {
        let policy = RetryPolicy::default();
        let missing = NewOperation::new(OperationKind::WebhookNotification {
            url: "https://example.com".to_string(),
            payload: serde_json::json!({}),
            secret: String::new(),
        });
        assert!(RetryOperation::create(missing, &policy).is_err());
        assert!(RetryOperation::create(webhook_op(), &policy).is_ok());
    }

    #[test]
    fn failure_reschedules_then_exhausts() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        }
        .without_jitter();

        let mut op =
            RetryOperation::create(webhook_op().with_max_retries(2), &policy).unwrap();

        let before = Utc::now();
        let disposition = op.record_failure("connection refused", &policy);
        match disposition {
            FailureDisposition::Rescheduled(at) => {
                assert!(at >= before + chrono::Duration::seconds(1));
            }
            other => panic!("expected reschedule, got {other:?}"),
        }
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.last_error.as_deref(), Some("connection refused"));
        assert!(op.final_error.is_none());

        let disposition = op.record_failure("connection refused", &policy);
        assert_eq!(disposition, FailureDisposition::Exhausted);
        assert_eq!(op.retry_count, 2);
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.final_error.is_some());
    }

    #[test]
    fn permanent_failure_skips_retry() {
        let policy = RetryPolicy::default();
        let mut op = RetryOperation::create(webhook_op(), &policy).unwrap();
        op.fail_permanent("unknown operation kind in stored row");
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 0);
        assert!(op.final_error.is_some());
    }

    #[test]
    fn kind_serializes_with_type_tag() {
        let op = RetryOperation::create(webhook_op(), &RetryPolicy::default()).unwrap();
        let json = serde_json::to_value(&op.kind).unwrap();
        assert_eq!(json["type"], "webhook_notification");
        let back: OperationKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, op.kind);
    }

    #[test]
    fn due_check_honors_schedule_and_exhaustion() {
        let policy = RetryPolicy::default().without_jitter();
        let mut op = RetryOperation::create(webhook_op(), &policy).unwrap();

        // Not due until the initial delay has elapsed.
        assert!(!op.is_due(Utc::now()));
        assert!(op.is_due(Utc::now() + chrono::Duration::seconds(31)));

        op.retry_count = op.max_retries;
        assert!(!op.is_due(Utc::now() + chrono::Duration::days(1)));
    }
}
