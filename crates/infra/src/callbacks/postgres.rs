//! Postgres-backed callback store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};

use folio_core::{BatchId, TrackingId};
use folio_moderation::callback::{correlation_key, CallbackCompletion};
use folio_moderation::{CallbackPayload, CallbackRecord, CallbackStatus};

use super::store::{CallbackStore, CallbackStoreError};

/// Postgres-backed callback store.
///
/// One row per correlation key; `upsert` uses `ON CONFLICT` so status
/// transitions overwrite in place.
#[derive(Debug, Clone)]
pub struct PostgresCallbackStore {
    pool: Arc<PgPool>,
}

impl PostgresCallbackStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CallbackStoreError {
    CallbackStoreError::Storage(format!("sqlx error in {operation}: {err}"))
}

fn status_str(status: CallbackStatus) -> &'static str {
    match status {
        CallbackStatus::Pending => "pending",
        CallbackStatus::Processing => "processing",
        CallbackStatus::Completed => "completed",
        CallbackStatus::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> Result<CallbackStatus, CallbackStoreError> {
    match raw {
        "pending" => Ok(CallbackStatus::Pending),
        "processing" => Ok(CallbackStatus::Processing),
        "completed" => Ok(CallbackStatus::Completed),
        "failed" => Ok(CallbackStatus::Failed),
        other => Err(CallbackStoreError::Storage(format!(
            "unknown callback status in row: {other}"
        ))),
    }
}

#[async_trait]
impl CallbackStore for PostgresCallbackStore {
    async fn upsert(&self, record: &CallbackRecord) -> Result<(), CallbackStoreError> {
        let key = record.correlation_key();
        if key.is_empty() {
            return Err(CallbackStoreError::Storage(
                "callback record has no correlation key".to_string(),
            ));
        }

        let payload = serde_json::to_value(&record.payload)
            .map_err(|e| CallbackStoreError::Storage(format!("serialize payload: {e}")))?;
        let completion = record
            .completion
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CallbackStoreError::Storage(format!("serialize completion: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO moderation_callbacks (
                correlation_key, tracking_id, batch_id, status, retry_count,
                max_retries, payload, last_error, completion, received_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (correlation_key)
            DO UPDATE SET
                status = EXCLUDED.status,
                retry_count = EXCLUDED.retry_count,
                max_retries = EXCLUDED.max_retries,
                payload = EXCLUDED.payload,
                last_error = EXCLUDED.last_error,
                completion = EXCLUDED.completion,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&key)
        .bind(record.tracking_id.as_ref().map(|t| t.as_str()))
        .bind(record.batch_id.as_ref().map(|b| b.as_str()))
        .bind(status_str(record.status))
        .bind(record.retry_count as i32)
        .bind(record.max_retries as i32)
        .bind(&payload)
        .bind(record.last_error.as_deref())
        .bind(&completion)
        .bind(record.received_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert", e))?;

        Ok(())
    }

    async fn find(
        &self,
        tracking_id: Option<&TrackingId>,
        batch_id: Option<&BatchId>,
    ) -> Result<Option<CallbackRecord>, CallbackStoreError> {
        let primary = correlation_key(tracking_id, None);
        let fallback = correlation_key(None, batch_id);

        let row = sqlx::query(
            r#"
            SELECT tracking_id, batch_id, status, retry_count, max_retries,
                   payload, last_error, completion, received_at, updated_at
            FROM moderation_callbacks
            WHERE correlation_key = ANY($1)
            ORDER BY (correlation_key = $2) DESC
            LIMIT 1
            "#,
        )
        .bind(
            [primary.clone(), fallback]
                .into_iter()
                .filter(|k| !k.is_empty())
                .collect::<Vec<_>>(),
        )
        .bind(&primary)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find", e))?;

        match row {
            Some(row) => {
                let stored = CallbackRow::from_row(&row)
                    .map_err(|e| CallbackStoreError::Storage(format!("decode row: {e}")))?;
                Ok(Some(stored.into_record()?))
            }
            None => Ok(None),
        }
    }
}

// SQLx row type

#[derive(Debug)]
struct CallbackRow {
    tracking_id: Option<String>,
    batch_id: Option<String>,
    status: String,
    retry_count: i32,
    max_retries: i32,
    payload: serde_json::Value,
    last_error: Option<String>,
    completion: Option<serde_json::Value>,
    received_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for CallbackRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(CallbackRow {
            tracking_id: row.try_get("tracking_id")?,
            batch_id: row.try_get("batch_id")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            payload: row.try_get("payload")?,
            last_error: row.try_get("last_error")?,
            completion: row.try_get("completion")?,
            received_at: row.try_get("received_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl CallbackRow {
    fn into_record(self) -> Result<CallbackRecord, CallbackStoreError> {
        let payload: CallbackPayload = serde_json::from_value(self.payload)
            .map_err(|e| CallbackStoreError::Storage(format!("decode payload: {e}")))?;
        let completion: Option<CallbackCompletion> = self
            .completion
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CallbackStoreError::Storage(format!("decode completion: {e}")))?;

        let tracking_id = self
            .tracking_id
            .map(TrackingId::new)
            .transpose()
            .map_err(|e| CallbackStoreError::Storage(e.to_string()))?;
        let batch_id = self
            .batch_id
            .map(BatchId::new)
            .transpose()
            .map_err(|e| CallbackStoreError::Storage(e.to_string()))?;

        Ok(CallbackRecord {
            tracking_id,
            batch_id,
            status: parse_status(&self.status)?,
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            payload,
            last_error: self.last_error,
            completion,
            received_at: self.received_at,
            updated_at: self.updated_at,
        })
    }
}
