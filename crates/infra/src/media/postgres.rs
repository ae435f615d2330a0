//! Postgres-backed media store.
//!
//! `apply_moderation` runs inside one transaction: a conflict pre-check
//! locks the matched rows, then a single UPDATE applies the outcome to all
//! of them. Any failure rolls the whole batch back.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};

use folio_core::{BatchId, MediaId, ModelSlug, TrackingId};
use folio_moderation::{MediaItem, ModerationStatus, ModerationUpdate, RiskLevel};

use super::store::{MediaStore, MediaStoreError};

/// Postgres-backed media store.
#[derive(Debug, Clone)]
pub struct PostgresMediaStore {
    pool: Arc<PgPool>,
}

impl PostgresMediaStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

const MEDIA_COLUMNS: &str = "id, model_slug, file_name, thumb_name, moderation_status, \
     moderation_score, risk_level, human_review_required, tracking_id, batch_id, \
     created_at, updated_at, moderated_at";

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> MediaStoreError {
    MediaStoreError::Storage(format!("sqlx error in {operation}: {err}"))
}

#[async_trait]
impl MediaStore for PostgresMediaStore {
    async fn insert(&self, media: &MediaItem) -> Result<(), MediaStoreError> {
        sqlx::query(
            r#"
            INSERT INTO media_items (
                id, model_slug, file_name, thumb_name, moderation_status,
                moderation_score, risk_level, human_review_required,
                tracking_id, batch_id, created_at, updated_at, moderated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(media.id.as_uuid())
        .bind(media.model_slug.as_str())
        .bind(&media.file_name)
        .bind(media.thumb_name.as_deref())
        .bind(media.moderation_status.as_str())
        .bind(media.moderation_score)
        .bind(media.risk_level.map(|r| r.as_str()))
        .bind(media.human_review_required)
        .bind(media.tracking_id.as_ref().map(|t| t.as_str()))
        .bind(media.batch_id.as_ref().map(|b| b.as_str()))
        .bind(media.created_at)
        .bind(media.updated_at)
        .bind(media.moderated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }

    async fn get(&self, id: MediaId) -> Result<Option<MediaItem>, MediaStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_items WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => {
                let stored = MediaRow::from_row(&row)
                    .map_err(|e| MediaStoreError::Storage(format!("decode row: {e}")))?;
                Ok(Some(stored.into_media()?))
            }
            None => Ok(None),
        }
    }

    async fn find_by_correlation(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
    ) -> Result<Vec<MediaItem>, MediaStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MEDIA_COLUMNS}
            FROM media_items
            WHERE ($1::text IS NOT NULL AND tracking_id = $1)
               OR ($2::text IS NOT NULL AND batch_id = $2)
            ORDER BY created_at ASC
            "#
        ))
        .bind(tracking_id.map(|t| t.as_str()))
        .bind(batch_id.map(|b| b.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_correlation", e))?;

        let mut media = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = MediaRow::from_row(&row)
                .map_err(|e| MediaStoreError::Storage(format!("decode row: {e}")))?;
            media.push(stored.into_media()?);
        }
        Ok(media)
    }

    async fn apply_moderation(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
        update: &ModerationUpdate,
    ) -> Result<u64, MediaStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("apply_moderation", e))?;

        // Lock matched rows and check transitions. A settled
        // approved/rejected row may not flip to the opposite resolved
        // outcome.
        let target = update.status;
        let locked = sqlx::query(
            r#"
            SELECT moderation_status
            FROM media_items
            WHERE ($1::text IS NOT NULL AND tracking_id = $1)
               OR ($2::text IS NOT NULL AND batch_id = $2)
            FOR UPDATE
            "#,
        )
        .bind(tracking_id.map(|t| t.as_str()))
        .bind(batch_id.map(|b| b.as_str()))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("apply_moderation", e))?;

        let conflicting = locked
            .iter()
            .filter_map(|row| row.try_get::<String, _>("moderation_status").ok())
            .filter(|status| {
                (status == "approved" || status == "rejected") && status != target.as_str()
            })
            .count();

        if target.is_resolved() && conflicting > 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("apply_moderation", e))?;
            return Err(MediaStoreError::Conflict(format!(
                "{conflicting} media row(s) already settled with a different outcome"
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE media_items
            SET moderation_status = $3,
                moderation_score = COALESCE($4, moderation_score),
                risk_level = COALESCE($5, risk_level),
                human_review_required = $6,
                moderated_at = $7,
                updated_at = $7
            WHERE ($1::text IS NOT NULL AND tracking_id = $1)
               OR ($2::text IS NOT NULL AND batch_id = $2)
            "#,
        )
        .bind(tracking_id.map(|t| t.as_str()))
        .bind(batch_id.map(|b| b.as_str()))
        .bind(target.as_str())
        .bind(update.score)
        .bind(update.risk_level.map(|r| r.as_str()))
        .bind(update.human_review_required)
        .bind(update.moderated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("apply_moderation", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("apply_moderation", e))?;
        Ok(updated.rows_affected())
    }
}

// SQLx row type

#[derive(Debug)]
struct MediaRow {
    id: uuid::Uuid,
    model_slug: String,
    file_name: String,
    thumb_name: Option<String>,
    moderation_status: String,
    moderation_score: Option<f64>,
    risk_level: Option<String>,
    human_review_required: bool,
    tracking_id: Option<String>,
    batch_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    moderated_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MediaRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MediaRow {
            id: row.try_get("id")?,
            model_slug: row.try_get("model_slug")?,
            file_name: row.try_get("file_name")?,
            thumb_name: row.try_get("thumb_name")?,
            moderation_status: row.try_get("moderation_status")?,
            moderation_score: row.try_get("moderation_score")?,
            risk_level: row.try_get("risk_level")?,
            human_review_required: row.try_get("human_review_required")?,
            tracking_id: row.try_get("tracking_id")?,
            batch_id: row.try_get("batch_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            moderated_at: row.try_get("moderated_at")?,
        })
    }
}

impl MediaRow {
    fn into_media(self) -> Result<MediaItem, MediaStoreError> {
        let decode = |e: folio_core::DomainError| MediaStoreError::Storage(e.to_string());

        Ok(MediaItem {
            id: MediaId::from_uuid(self.id),
            model_slug: ModelSlug::new(self.model_slug).map_err(decode)?,
            file_name: self.file_name,
            thumb_name: self.thumb_name,
            moderation_status: ModerationStatus::from_str(&self.moderation_status)
                .map_err(decode)?,
            moderation_score: self.moderation_score,
            risk_level: self
                .risk_level
                .as_deref()
                .map(RiskLevel::from_str)
                .transpose()
                .map_err(decode)?,
            human_review_required: self.human_review_required,
            tracking_id: self.tracking_id.map(TrackingId::new).transpose().map_err(decode)?,
            batch_id: self.batch_id.map(BatchId::new).transpose().map_err(decode)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            moderated_at: self.moderated_at,
        })
    }
}
