//! Postgres-backed operation store.
//!
//! Due-operation fetching claims rows with a conditional
//! `UPDATE ... WHERE status = 'pending' ... RETURNING` over a
//! `FOR UPDATE SKIP LOCKED` candidate set, so concurrent runner processes
//! never both hold the same operation. The schema carries an index on
//! `(status, next_retry_at, retry_count)` for the due scan.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};

use folio_core::{BatchId, MediaId, ModelSlug, OperationId, TrackingId};
use folio_moderation::{
    FailureDisposition, NewOperation, OperationKind, OperationStatus, RetryOperation, RetryPolicy,
};

use super::store::{OperationStats, OperationStore, OperationStoreError};

/// Postgres-backed operation store.
#[derive(Debug, Clone)]
pub struct PostgresOperationStore {
    pool: Arc<PgPool>,
    policy: RetryPolicy,
}

impl PostgresOperationStore {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            pool: Arc::new(pool),
            policy,
        }
    }
}

const OPERATION_COLUMNS: &str = "id, op_type, kind, tracking_id, batch_id, model_slug, media_id, \
     retry_count, max_retries, next_retry_at, priority, status, last_error, final_error, \
     result, created_at, updated_at, completed_at";

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OperationStoreError {
    OperationStoreError::Storage(format!("sqlx error in {operation}: {err}"))
}

#[async_trait]
impl OperationStore for PostgresOperationStore {
    async fn enqueue(&self, new: NewOperation) -> Result<OperationId, OperationStoreError> {
        let op = RetryOperation::create(new, &self.policy)?;

        let kind_json = serde_json::to_value(&op.kind)
            .map_err(|e| OperationStoreError::Storage(format!("serialize kind: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO retry_operations (
                id, op_type, kind, tracking_id, batch_id, model_slug, media_id,
                retry_count, max_retries, next_retry_at, priority, status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(op.id.as_uuid())
        .bind(op.kind.name())
        .bind(&kind_json)
        .bind(op.tracking_id.as_ref().map(|t| t.as_str()))
        .bind(op.batch_id.as_ref().map(|b| b.as_str()))
        .bind(op.model_slug.as_ref().map(|s| s.as_str()))
        .bind(op.media_id.as_ref().map(|m| *m.as_uuid()))
        .bind(op.retry_count as i32)
        .bind(op.max_retries as i32)
        .bind(op.next_retry_at)
        .bind(op.priority)
        .bind(op.status.as_str())
        .bind(op.created_at)
        .bind(op.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        Ok(op.id)
    }

    async fn fetch_due(&self, limit: usize) -> Result<Vec<RetryOperation>, OperationStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            WITH candidate AS (
                SELECT id
                FROM retry_operations
                WHERE status = 'pending'
                  AND next_retry_at <= now()
                  AND retry_count < max_retries
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE retry_operations
            SET status = 'processing', updated_at = now()
            WHERE id IN (SELECT id FROM candidate)
            RETURNING {OPERATION_COLUMNS}
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_due", e))?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = OperationRow::from_row(&row)
                .map_err(|e| OperationStoreError::Storage(format!("decode row: {e}")))?;
            operations.push(stored.into_operation()?);
        }

        // UPDATE ... RETURNING does not guarantee ordering; restore the
        // dispatch order here.
        operations.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(operations)
    }

    async fn mark_completed(
        &self,
        id: OperationId,
        result: Option<String>,
    ) -> Result<(), OperationStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE retry_operations
            SET status = 'completed', result = $2, completed_at = now(), updated_at = now()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id.as_uuid())
        .bind(result)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_completed", e))?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }

        // Distinguish the idempotent no-op from a bogus id.
        let exists = sqlx::query("SELECT 1 FROM retry_operations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_completed", e))?;
        if exists.is_some() {
            Ok(())
        } else {
            Err(OperationStoreError::NotFound(id))
        }
    }

    async fn schedule_retry(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<FailureDisposition, OperationStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("schedule_retry", e))?;

        let row = sqlx::query(
            r#"
            SELECT retry_count, max_retries, status
            FROM retry_operations
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("schedule_retry", e))?
        .ok_or(OperationStoreError::NotFound(id))?;

        let retry_count: i32 = row
            .try_get("retry_count")
            .map_err(|e| map_sqlx_error("schedule_retry", e))?;
        let max_retries: i32 = row
            .try_get("max_retries")
            .map_err(|e| map_sqlx_error("schedule_retry", e))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| map_sqlx_error("schedule_retry", e))?;

        if status == "completed" || status == "failed" {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("schedule_retry", e))?;
            return Err(OperationStoreError::Storage(format!(
                "operation {id} is already terminal"
            )));
        }

        let next_count = retry_count + 1;
        let disposition = if next_count >= max_retries {
            sqlx::query(
                r#"
                UPDATE retry_operations
                SET retry_count = $2, status = 'failed', last_error = $3, final_error = $3,
                    completed_at = now(), updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(next_count)
            .bind(error)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("schedule_retry", e))?;
            FailureDisposition::Exhausted
        } else {
            let next_at = self.policy.next_retry_at(next_count as u32);
            sqlx::query(
                r#"
                UPDATE retry_operations
                SET retry_count = $2, status = 'pending', last_error = $3,
                    next_retry_at = $4, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(next_count)
            .bind(error)
            .bind(next_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("schedule_retry", e))?;
            FailureDisposition::Rescheduled(next_at)
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("schedule_retry", e))?;
        Ok(disposition)
    }

    async fn fail_permanent(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<(), OperationStoreError> {
        sqlx::query(
            r#"
            UPDATE retry_operations
            SET status = 'failed', final_error = $2, completed_at = now(), updated_at = now()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail_permanent", e))?;
        Ok(())
    }

    async fn release(&self, id: OperationId) -> Result<(), OperationStoreError> {
        sqlx::query(
            r#"
            UPDATE retry_operations
            SET status = 'pending', updated_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;
        Ok(())
    }

    async fn get(&self, id: OperationId) -> Result<Option<RetryOperation>, OperationStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {OPERATION_COLUMNS} FROM retry_operations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => {
                let stored = OperationRow::from_row(&row)
                    .map_err(|e| OperationStoreError::Storage(format!("decode row: {e}")))?;
                Ok(Some(stored.into_operation()?))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        status: Option<OperationStatus>,
        limit: usize,
    ) -> Result<Vec<RetryOperation>, OperationStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OPERATION_COLUMNS}
            FROM retry_operations
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = OperationRow::from_row(&row)
                .map_err(|e| OperationStoreError::Storage(format!("decode row: {e}")))?;
            operations.push(stored.into_operation()?);
        }
        Ok(operations)
    }

    async fn purge_terminal(&self, older_than_days: u32) -> Result<u64, OperationStoreError> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM retry_operations
            WHERE status IN ('completed', 'failed')
              AND completed_at < now() - make_interval(days => $1)
            "#,
        )
        .bind(older_than_days as i32)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_terminal", e))?;
        Ok(deleted.rows_affected())
    }

    async fn stats(&self) -> Result<OperationStats, OperationStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COALESCE(AVG(retry_count), 0)::float8 AS avg_retry_count
            FROM retry_operations
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let pending: i64 = row.try_get("pending").map_err(|e| map_sqlx_error("stats", e))?;
        let processing: i64 = row
            .try_get("processing")
            .map_err(|e| map_sqlx_error("stats", e))?;
        let completed: i64 = row
            .try_get("completed")
            .map_err(|e| map_sqlx_error("stats", e))?;
        let failed: i64 = row.try_get("failed").map_err(|e| map_sqlx_error("stats", e))?;
        let avg_retry_count: f64 = row
            .try_get("avg_retry_count")
            .map_err(|e| map_sqlx_error("stats", e))?;

        let terminal = completed + failed;
        Ok(OperationStats {
            pending: pending as u64,
            processing: processing as u64,
            completed: completed as u64,
            failed: failed as u64,
            avg_retry_count,
            success_rate: if terminal == 0 {
                1.0
            } else {
                completed as f64 / terminal as f64
            },
        })
    }
}

// SQLx row type

#[derive(Debug)]
struct OperationRow {
    id: uuid::Uuid,
    kind: serde_json::Value,
    tracking_id: Option<String>,
    batch_id: Option<String>,
    model_slug: Option<String>,
    media_id: Option<uuid::Uuid>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: DateTime<Utc>,
    priority: i32,
    status: String,
    last_error: Option<String>,
    final_error: Option<String>,
    result: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OperationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OperationRow {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            tracking_id: row.try_get("tracking_id")?,
            batch_id: row.try_get("batch_id")?,
            model_slug: row.try_get("model_slug")?,
            media_id: row.try_get("media_id")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            next_retry_at: row.try_get("next_retry_at")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            last_error: row.try_get("last_error")?,
            final_error: row.try_get("final_error")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl OperationRow {
    fn into_operation(self) -> Result<RetryOperation, OperationStoreError> {
        let id = OperationId::from_uuid(self.id);
        let corrupt = |detail: String| OperationStoreError::CorruptRow { id, detail };

        let kind: OperationKind = serde_json::from_value(self.kind)
            .map_err(|e| corrupt(format!("unrecognized operation kind: {e}")))?;
        let status = OperationStatus::from_str(&self.status)
            .map_err(|e| corrupt(e.to_string()))?;

        let tracking_id = self
            .tracking_id
            .map(TrackingId::new)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let batch_id = self
            .batch_id
            .map(BatchId::new)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let model_slug = self
            .model_slug
            .map(ModelSlug::new)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(RetryOperation {
            id,
            kind,
            tracking_id,
            batch_id,
            model_slug,
            media_id: self.media_id.map(MediaId::from_uuid),
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            next_retry_at: self.next_retry_at,
            priority: self.priority,
            status,
            last_error: self.last_error,
            final_error: self.final_error,
            result: self.result,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}
