//! In-memory media store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use folio_core::{BatchId, MediaId, TrackingId};
use folio_moderation::{MediaItem, ModerationStatus, ModerationUpdate};

use super::store::{MediaStore, MediaStoreError};

fn matches_correlation(
    media: &MediaItem,
    tracking_id: Option<&TrackingId>,
    batch_id: Option<&BatchId>,
) -> bool {
    let by_tracking = tracking_id
        .map(|t| media.tracking_id.as_ref() == Some(t))
        .unwrap_or(false);
    let by_batch = batch_id
        .map(|b| media.batch_id.as_ref() == Some(b))
        .unwrap_or(false);
    by_tracking || by_batch
}

/// A settled approved/rejected row may not flip to the opposite outcome via
/// a late callback; re-applying the same outcome is fine (idempotent
/// re-delivery), and flagged rows may be resolved either way by review.
fn check_transition(media: &MediaItem, target: ModerationStatus) -> Result<(), MediaStoreError> {
    let settled = matches!(
        media.moderation_status,
        ModerationStatus::Approved | ModerationStatus::Rejected
    );
    let target_resolved = target.is_resolved();
    if settled && target_resolved && media.moderation_status != target {
        return Err(MediaStoreError::Conflict(format!(
            "media {} is {} and cannot become {}",
            media.id, media.moderation_status, target
        )));
    }
    Ok(())
}

/// In-memory media store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMediaStore {
    media: RwLock<HashMap<MediaId, MediaItem>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn insert(&self, media: &MediaItem) -> Result<(), MediaStoreError> {
        self.media
            .write()
            .unwrap()
            .insert(media.id, media.clone());
        Ok(())
    }

    async fn get(&self, id: MediaId) -> Result<Option<MediaItem>, MediaStoreError> {
        Ok(self.media.read().unwrap().get(&id).cloned())
    }

    async fn find_by_correlation(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
    ) -> Result<Vec<MediaItem>, MediaStoreError> {
        let media = self.media.read().unwrap();
        let mut result: Vec<_> = media
            .values()
            .filter(|m| matches_correlation(m, tracking_id, batch_id))
            .cloned()
            .collect();
        result.sort_by_key(|m| m.created_at);
        Ok(result)
    }

    async fn apply_moderation(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
        update: &ModerationUpdate,
    ) -> Result<u64, MediaStoreError> {
        let mut media = self.media.write().unwrap();

        let matched: Vec<MediaId> = media
            .values()
            .filter(|m| matches_correlation(m, tracking_id, batch_id))
            .map(|m| m.id)
            .collect();

        // Validate every row before mutating any, so a bad row leaves the
        // whole batch untouched.
        for id in &matched {
            check_transition(&media[id], update.status)?;
        }

        for id in &matched {
            if let Some(m) = media.get_mut(id) {
                m.apply(update);
            }
        }
        Ok(matched.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_core::ModelSlug;
    use std::collections::BTreeMap;

    fn slug() -> ModelSlug {
        ModelSlug::new("ava").unwrap()
    }

    fn batch_media(batch: &str, n: usize) -> Vec<MediaItem> {
        (0..n)
            .map(|i| {
                MediaItem::new(slug(), format!("photo-{i:02}.jpg"))
                    .with_batch_id(BatchId::new(batch).unwrap())
            })
            .collect()
    }

    fn update(status: ModerationStatus) -> ModerationUpdate {
        ModerationUpdate {
            status,
            score: Some(10.0),
            risk_level: None,
            human_review_required: false,
            detected_parts: BTreeMap::new(),
            moderated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn applies_to_every_row_in_the_batch() {
        let store = InMemoryMediaStore::new();
        for m in batch_media("B1", 3) {
            store.insert(&m).await.unwrap();
        }

        let batch = BatchId::new("B1").unwrap();
        let updated = store
            .apply_moderation(None, Some(&batch), &update(ModerationStatus::Approved))
            .await
            .unwrap();
        assert_eq!(updated, 3);

        for m in store.find_by_correlation(None, Some(&batch)).await.unwrap() {
            assert_eq!(m.moderation_status, ModerationStatus::Approved);
            assert!(m.moderated_at.is_some());
        }
    }

    #[tokio::test]
    async fn conflicting_row_rolls_back_the_whole_batch() {
        let store = InMemoryMediaStore::new();
        let mut items = batch_media("B1", 5);
        // Row 3 of 5 already settled the other way.
        items[2].moderation_status = ModerationStatus::Rejected;
        for m in &items {
            store.insert(m).await.unwrap();
        }

        let batch = BatchId::new("B1").unwrap();
        let err = store
            .apply_moderation(None, Some(&batch), &update(ModerationStatus::Approved))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaStoreError::Conflict(_)));

        // Nothing was applied: rows 1-5 keep their pre-callback status.
        let after = store.find_by_correlation(None, Some(&batch)).await.unwrap();
        let pending = after
            .iter()
            .filter(|m| m.moderation_status == ModerationStatus::Pending)
            .count();
        let rejected = after
            .iter()
            .filter(|m| m.moderation_status == ModerationStatus::Rejected)
            .count();
        assert_eq!(pending, 4);
        assert_eq!(rejected, 1);
        assert!(after.iter().all(|m| m.moderated_at.is_none()));
    }

    #[tokio::test]
    async fn zero_matches_reports_zero() {
        let store = InMemoryMediaStore::new();
        let batch = BatchId::new("nope").unwrap();
        let updated = store
            .apply_moderation(None, Some(&batch), &update(ModerationStatus::Approved))
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn reapplying_same_outcome_is_allowed() {
        let store = InMemoryMediaStore::new();
        let media = batch_media("B1", 1).pop().unwrap();
        store.insert(&media).await.unwrap();

        let batch = BatchId::new("B1").unwrap();
        let u = update(ModerationStatus::Approved);
        store.apply_moderation(None, Some(&batch), &u).await.unwrap();
        let again = store.apply_moderation(None, Some(&batch), &u).await.unwrap();
        assert_eq!(again, 1);
    }
}
