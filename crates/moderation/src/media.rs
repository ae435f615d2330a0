//! Media items and the batch update applied when a callback resolves.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use folio_core::{BatchId, MediaId, ModelSlug, TrackingId};

use crate::callback::ValidatedCallback;
use crate::status::{ModerationStatus, RiskLevel};

/// One uploaded media item (photo/video) in a model's portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: MediaId,
    pub model_slug: ModelSlug,
    pub file_name: String,
    pub thumb_name: Option<String>,
    pub moderation_status: ModerationStatus,
    pub moderation_score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub human_review_required: bool,
    pub tracking_id: Option<TrackingId>,
    pub batch_id: Option<BatchId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub moderated_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    pub fn new(model_slug: ModelSlug, file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MediaId::new(),
            model_slug,
            file_name: file_name.into(),
            thumb_name: None,
            moderation_status: ModerationStatus::Pending,
            moderation_score: None,
            risk_level: None,
            human_review_required: false,
            tracking_id: None,
            batch_id: None,
            created_at: now,
            updated_at: now,
            moderated_at: None,
        }
    }

    pub fn with_thumb(mut self, thumb_name: impl Into<String>) -> Self {
        self.thumb_name = Some(thumb_name.into());
        self
    }

    pub fn with_tracking_id(mut self, tracking_id: TrackingId) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }

    pub fn with_batch_id(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Apply a resolved moderation outcome to this row.
    pub fn apply(&mut self, update: &ModerationUpdate) {
        self.moderation_status = update.status;
        if update.score.is_some() {
            self.moderation_score = update.score;
        }
        if update.risk_level.is_some() {
            self.risk_level = update.risk_level;
        }
        self.human_review_required = update.human_review_required;
        self.moderated_at = Some(update.moderated_at);
        self.updated_at = update.moderated_at;
    }
}

/// The row update computed once per callback and applied to every media
/// item linked to the callback's tracking/batch id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationUpdate {
    pub status: ModerationStatus,
    pub score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub human_review_required: bool,
    pub detected_parts: BTreeMap<String, f64>,
    pub moderated_at: DateTime<Utc>,
}

impl ModerationUpdate {
    pub fn from_callback(valid: &ValidatedCallback) -> Self {
        // Flagged content always goes to a human regardless of what the
        // service said.
        let human_review_required =
            valid.human_review_required || valid.status == ModerationStatus::Flagged;
        Self {
            status: valid.status,
            score: valid.score,
            risk_level: valid.risk_level,
            human_review_required,
            detected_parts: valid.detected_parts.clone(),
            moderated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackPayload;

    fn validated(status: &str, score: Option<f64>) -> ValidatedCallback {
        CallbackPayload {
            moderation_status: status.to_string(),
            moderation_tracking_id: Some("trk-1".to_string()),
            batch_id: None,
            moderation_score: score,
            confidence: None,
            risk_level: None,
            detected_parts: None,
            face_analysis: None,
            human_review_required: None,
            policy_violations: None,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn apply_updates_row_in_place() {
        let slug = ModelSlug::new("ava").unwrap();
        let mut media = MediaItem::new(slug, "photo-01.jpg");
        assert_eq!(media.moderation_status, ModerationStatus::Pending);

        let update = ModerationUpdate::from_callback(&validated("approved", Some(12.0)));
        media.apply(&update);

        assert_eq!(media.moderation_status, ModerationStatus::Approved);
        assert_eq!(media.moderation_score, Some(12.0));
        assert_eq!(media.risk_level, Some(RiskLevel::Minimal));
        assert!(media.moderated_at.is_some());
    }

    #[test]
    fn flagged_forces_human_review() {
        let update = ModerationUpdate::from_callback(&validated("flagged", Some(65.0)));
        assert!(update.human_review_required);
    }

    #[test]
    fn score_absent_leaves_existing_values() {
        let slug = ModelSlug::new("ava").unwrap();
        let mut media = MediaItem::new(slug, "photo-01.jpg");
        media.moderation_score = Some(33.0);

        let update = ModerationUpdate::from_callback(&validated("rejected", None));
        media.apply(&update);

        assert_eq!(media.moderation_status, ModerationStatus::Rejected);
        assert_eq!(media.moderation_score, Some(33.0));
    }
}
