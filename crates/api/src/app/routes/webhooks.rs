//! Inbound moderation-result webhook.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;

use folio_infra::external::webhook as signing;
use folio_infra::pipeline::{IngestOutcome, RejectReason};
use folio_moderation::CallbackPayload;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/moderation", post(receive_moderation_callback))
}

/// POST /webhooks/moderation
///
/// Body: JSON with `moderation_status` and at least one of
/// `moderation_tracking_id` / `batch_id`. When a webhook secret is
/// configured the `X-Signature` header is verified over the raw body before
/// anything is parsed.
pub async fn receive_moderation_callback(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if let Some(secret) = &services.webhook_secret {
        let verified = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .map(|header| signing::verify(secret, header, &body))
            .unwrap_or(false);
        if !verified {
            return errors::json_error(
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                "callback signature missing or invalid",
            );
        }
    }

    let payload: CallbackPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_payload",
                format!("malformed callback body: {e}"),
            );
        }
    };

    let outcome = services.ingestor.ingest(payload).await;
    match outcome {
        IngestOutcome::Applied { updated_media } => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "updated_media_count": updated_media,
            })),
        )
            .into_response(),
        IngestOutcome::AlreadyProcessed => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "updated_media_count": 0,
                "already_processed": true,
            })),
        )
            .into_response(),
        IngestOutcome::Rejected { reason, error } => {
            let status = match reason {
                RejectReason::NoMatchingMedia => StatusCode::NOT_FOUND,
                RejectReason::InvalidPayload | RejectReason::Conflict => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(json!({
                    "success": false,
                    "updated_media_count": 0,
                    "error": error,
                })),
            )
                .into_response()
        }
        // A non-2xx tells the moderation service its delivery did not land;
        // our own retry may also already be scheduled.
        IngestOutcome::Deferred { error, will_retry } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "updated_media_count": 0,
                "error": error,
                "will_retry": will_retry,
            })),
        )
            .into_response(),
    }
}
