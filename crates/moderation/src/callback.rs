//! Inbound moderation callback payloads and per-callback state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use folio_core::{BatchId, TrackingId};

use crate::status::{ModerationStatus, RiskLevel};

/// Raw callback body as posted by the moderation service.
///
/// Field names follow the service's wire format. Unknown extra fields are
/// tolerated; everything we rely on is re-checked in [`CallbackPayload::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub moderation_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation_tracking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    /// Per-category detection scores (0-100), e.g. `{"breast": 87.5}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_parts: Option<BTreeMap<String, f64>>,
    /// Opaque face-analysis blob; stored for audit, never interpreted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_analysis: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_review_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_violations: Option<Vec<String>>,
}

/// Validation failure for an inbound callback.
///
/// These are sender bugs, not transient faults: a payload that fails
/// validation is rejected immediately and never scheduled for retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("callback carries neither moderation_tracking_id nor batch_id")]
    MissingCorrelation,
    #[error("unknown moderation_status: {0}")]
    UnknownStatus(String),
    #[error("unknown risk_level: {0}")]
    UnknownRiskLevel(String),
    #[error("{field} out of range: {value} (expected 0-100)")]
    ScoreOutOfRange { field: &'static str, value: String },
    #[error("invalid correlation key: {0}")]
    InvalidCorrelation(String),
}

/// A callback that passed validation, with fields parsed into domain types.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCallback {
    pub status: ModerationStatus,
    pub tracking_id: Option<TrackingId>,
    pub batch_id: Option<BatchId>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub detected_parts: BTreeMap<String, f64>,
    pub face_analysis: Option<serde_json::Value>,
    pub human_review_required: bool,
    pub policy_violations: Vec<String>,
}

fn check_range(field: &'static str, value: f64) -> Result<(), CallbackError> {
    if !(0.0..=100.0).contains(&value) || value.is_nan() {
        return Err(CallbackError::ScoreOutOfRange {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl CallbackPayload {
    /// Validate the raw payload and parse it into domain types.
    pub fn validate(&self) -> Result<ValidatedCallback, CallbackError> {
        let status: ModerationStatus = self
            .moderation_status
            .parse()
            .map_err(|_| CallbackError::UnknownStatus(self.moderation_status.clone()))?;

        if self.moderation_tracking_id.is_none() && self.batch_id.is_none() {
            return Err(CallbackError::MissingCorrelation);
        }

        let tracking_id = self
            .moderation_tracking_id
            .as_deref()
            .map(TrackingId::new)
            .transpose()
            .map_err(|e| CallbackError::InvalidCorrelation(e.to_string()))?;
        let batch_id = self
            .batch_id
            .as_deref()
            .map(BatchId::new)
            .transpose()
            .map_err(|e| CallbackError::InvalidCorrelation(e.to_string()))?;
        if tracking_id.is_none() && batch_id.is_none() {
            // Keys were present but blank.
            return Err(CallbackError::MissingCorrelation);
        }

        if let Some(score) = self.moderation_score {
            check_range("moderation_score", score)?;
        }
        if let Some(confidence) = self.confidence {
            check_range("confidence", confidence)?;
        }
        let detected_parts = self.detected_parts.clone().unwrap_or_default();
        for (part, score) in &detected_parts {
            check_range("detected_parts", *score).map_err(|_| CallbackError::ScoreOutOfRange {
                field: "detected_parts",
                value: format!("{part}={score}"),
            })?;
        }

        // Explicit risk level wins; otherwise derive one from the score.
        let risk_level = match self.risk_level.as_deref() {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| CallbackError::UnknownRiskLevel(raw.to_string()))?,
            ),
            None => self.moderation_score.map(RiskLevel::from_score),
        };

        Ok(ValidatedCallback {
            status,
            tracking_id,
            batch_id,
            score: self.moderation_score,
            confidence: self.confidence,
            risk_level,
            detected_parts,
            face_analysis: self.face_analysis.clone(),
            human_review_required: self.human_review_required.unwrap_or(false),
            policy_violations: self.policy_violations.clone().unwrap_or_default(),
        })
    }
}

/// Processing state of one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CallbackStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallbackStatus::Completed | CallbackStatus::Failed)
    }
}

/// Completion metadata recorded when a callback resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackCompletion {
    pub status: ModerationStatus,
    pub updated_media: usize,
    pub policy_violations: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Durable record of one inbound callback, keyed by its correlation ids.
///
/// The record tracks ingestion state and provides the idempotency check for
/// re-delivered callbacks. Retry *scheduling* is not done here: every
/// reschedule goes through the operation store as a `CallbackRetry`
/// operation, so there is a single source of backoff truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub tracking_id: Option<TrackingId>,
    pub batch_id: Option<BatchId>,
    pub status: CallbackStatus,
    /// Ingestion attempts so far (mirrors the operation's retry count).
    pub retry_count: u32,
    pub max_retries: u32,
    pub payload: CallbackPayload,
    pub last_error: Option<String>,
    pub completion: Option<CallbackCompletion>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallbackRecord {
    pub fn new(valid: &ValidatedCallback, payload: CallbackPayload, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            tracking_id: valid.tracking_id.clone(),
            batch_id: valid.batch_id.clone(),
            status: CallbackStatus::Pending,
            retry_count: 0,
            max_retries,
            payload,
            last_error: None,
            completion: None,
            received_at: now,
            updated_at: now,
        }
    }

    /// Stable key for store lookups: tracking id if present, else batch id.
    pub fn correlation_key(&self) -> String {
        correlation_key(self.tracking_id.as_ref(), self.batch_id.as_ref())
    }

    pub fn mark_processing(&mut self) {
        self.status = CallbackStatus::Processing;
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self, completion: CallbackCompletion) {
        self.status = CallbackStatus::Completed;
        self.completion = Some(completion);
        self.updated_at = Utc::now();
    }

    /// Terminal failure without retry (stale callback, conflicting outcome).
    pub fn fail_permanent(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.status = CallbackStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Record a failed ingestion attempt. Returns `true` while another
    /// attempt is still allowed; transitions to Failed otherwise.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
        if self.retry_count < self.max_retries {
            self.status = CallbackStatus::Pending;
            true
        } else {
            self.status = CallbackStatus::Failed;
            false
        }
    }
}

/// Shared correlation-key formatting for callback and media lookups.
pub fn correlation_key(tracking_id: Option<&TrackingId>, batch_id: Option<&BatchId>) -> String {
    match (tracking_id, batch_id) {
        (Some(t), _) => format!("trk:{t}"),
        (None, Some(b)) => format!("batch:{b}"),
        (None, None) => String::new(),
    }
}
