//! In-memory callback store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use folio_core::{BatchId, TrackingId};
use folio_moderation::callback::correlation_key;
use folio_moderation::CallbackRecord;

use super::store::{CallbackStore, CallbackStoreError};

/// In-memory callback store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCallbackStore {
    records: RwLock<HashMap<String, CallbackRecord>>,
}

impl InMemoryCallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl CallbackStore for InMemoryCallbackStore {
    async fn upsert(&self, record: &CallbackRecord) -> Result<(), CallbackStoreError> {
        let key = record.correlation_key();
        if key.is_empty() {
            return Err(CallbackStoreError::Storage(
                "callback record has no correlation key".to_string(),
            ));
        }
        self.records.write().unwrap().insert(key, record.clone());
        Ok(())
    }

    async fn find(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
    ) -> Result<Option<CallbackRecord>, CallbackStoreError> {
        let records = self.records.read().unwrap();
        // Tracking id is the primary key; fall back to batch-keyed records
        // for batch-only callbacks.
        if let Some(t) = tracking_id {
            if let Some(r) = records.get(&correlation_key(Some(t), None)) {
                return Ok(Some(r.clone()));
            }
        }
        if let Some(b) = batch_id {
            if let Some(r) = records.get(&correlation_key(None, Some(b))) {
                return Ok(Some(r.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_moderation::{CallbackPayload, CallbackStatus};

    fn record(tracking: Option<&str>, batch: Option<&str>) -> CallbackRecord {
        let payload = CallbackPayload {
            moderation_status: "approved".to_string(),
            moderation_tracking_id: tracking.map(str::to_string),
            batch_id: batch.map(str::to_string),
            moderation_score: None,
            confidence: None,
            risk_level: None,
            detected_parts: None,
            face_analysis: None,
            human_review_required: None,
            policy_violations: None,
        };
        let valid = payload.validate().unwrap();
        CallbackRecord::new(&valid, payload, 5)
    }

    #[tokio::test]
    async fn upsert_replaces_by_correlation_key() {
        let store = InMemoryCallbackStore::new();
        let mut r = record(Some("trk-1"), None);
        store.upsert(&r).await.unwrap();

        r.mark_processing();
        store.upsert(&r).await.unwrap();

        let found = store
            .find(r.tracking_id.as_ref(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, CallbackStatus::Processing);
        assert_eq!(found.retry_count, 1);
    }

    #[tokio::test]
    async fn batch_only_records_are_found_by_batch() {
        let store = InMemoryCallbackStore::new();
        let r = record(None, Some("B1"));
        store.upsert(&r).await.unwrap();

        let found = store.find(None, r.batch_id.as_ref()).await.unwrap();
        assert!(found.is_some());
        assert!(store.find(None, None).await.unwrap().is_none());
    }
}
