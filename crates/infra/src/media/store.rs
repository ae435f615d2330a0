//! Media store abstraction.

use async_trait::async_trait;

use folio_core::{BatchId, MediaId, TrackingId};
use folio_moderation::{MediaItem, ModerationUpdate};

/// Media store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaStoreError {
    #[error("media not found: {0}")]
    NotFound(MediaId),
    /// A row in the batch cannot legally take the requested transition
    /// (e.g. rejected -> approved). Non-retryable; nothing was applied.
    #[error("conflicting moderation transition: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl MediaStoreError {
    /// Conflicts are sender/state bugs; storage errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, MediaStoreError::Storage(_))
    }
}

/// Durable store for media rows.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert(&self, media: &MediaItem) -> Result<(), MediaStoreError>;

    async fn get(&self, id: MediaId) -> Result<Option<MediaItem>, MediaStoreError>;

    /// All media rows linked to the given tracking and/or batch id.
    async fn find_by_correlation(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
    ) -> Result<Vec<MediaItem>, MediaStoreError>;

    /// Apply one moderation outcome to every linked row, all-or-nothing.
    ///
    /// Either every matched row takes the update or none does; partial
    /// application across a batch is forbidden. Returns rows updated.
    async fn apply_moderation(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
        update: &ModerationUpdate,
    ) -> Result<u64, MediaStoreError>;
}
