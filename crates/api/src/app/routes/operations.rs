//! Operator-grade visibility into the retry pipeline.
//!
//! Read-only queries over the operation store plus a manual trigger for the
//! retry runner. Guarded by a static API key when one is configured.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use folio_core::OperationId;
use folio_moderation::{OperationStatus, RetryOperation};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/operations", get(list_operations))
        .route("/operations/stats", get(operation_stats))
        .route("/operations/run", post(run_now))
        .route("/operations/:id", get(get_operation))
}

#[derive(Debug, Deserialize)]
pub struct OperationListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

fn check_api_key(services: &AppServices, headers: &HeaderMap) -> Result<(), axum::response::Response> {
    let Some(expected) = &services.api_key else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid api key",
        ))
    }
}

fn operation_to_json(op: &RetryOperation) -> serde_json::Value {
    serde_json::json!({
        "id": op.id,
        "type": op.kind.name(),
        "tracking_id": op.tracking_id,
        "batch_id": op.batch_id,
        "model_slug": op.model_slug,
        "media_id": op.media_id,
        "status": op.status,
        "retry_count": op.retry_count,
        "max_retries": op.max_retries,
        "next_retry_at": op.next_retry_at,
        "priority": op.priority,
        "last_error": op.last_error,
        "final_error": op.final_error,
        "created_at": op.created_at,
        "completed_at": op.completed_at,
    })
}

/// GET /admin/operations?status=failed&limit=50
pub async fn list_operations(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Query(query): Query<OperationListQuery>,
) -> axum::response::Response {
    if let Err(response) = check_api_key(&services, &headers) {
        return response;
    }

    let status = match query.status.as_deref() {
        Some(raw) => match OperationStatus::from_str(raw) {
            Ok(status) => Some(status),
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string());
            }
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(50).min(1000) as usize;

    match services.operations.list(status, limit).await {
        Ok(operations) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "operations": operations.iter().map(operation_to_json).collect::<Vec<_>>(),
                "count": operations.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

/// GET /admin/operations/stats
pub async fn operation_stats(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(response) = check_api_key(&services, &headers) {
        return response;
    }

    match services.operations.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

/// GET /admin/operations/:id
pub async fn get_operation(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(response) = check_api_key(&services, &headers) {
        return response;
    }

    let id = match OperationId::from_str(&id) {
        Ok(id) => id,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string());
        }
    };

    match services.operations.get(id).await {
        Ok(Some(op)) => (StatusCode::OK, Json(operation_to_json(&op))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "operation not found"),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

/// POST /admin/operations/run
///
/// Manual/administrative invocation of the retry loop. Reports whether the
/// tick was skipped because a run was already in progress.
pub async fn run_now(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(response) = check_api_key(&services, &headers) {
        return response;
    }

    let report = services.runner.run_once().await;
    (StatusCode::OK, Json(report)).into_response()
}
