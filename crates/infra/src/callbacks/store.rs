//! Callback store abstraction.

use async_trait::async_trait;

use folio_core::{BatchId, TrackingId};
use folio_moderation::CallbackRecord;

/// Callback store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallbackStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable store for callback records.
///
/// Records are keyed by correlation (tracking id, falling back to batch id);
/// `upsert` replaces the stored record for that key, which is how status
/// transitions are persisted.
#[async_trait]
pub trait CallbackStore: Send + Sync {
    async fn upsert(&self, record: &CallbackRecord) -> Result<(), CallbackStoreError>;

    async fn find(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
    ) -> Result<Option<CallbackRecord>, CallbackStoreError>;
}
