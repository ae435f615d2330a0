//! External service clients consumed by the retry pipeline.

pub mod moderation_api;
pub mod webhook;

pub use moderation_api::HttpModerationSubmitter;
pub use webhook::HttpWebhookSender;

use async_trait::async_trait;

use folio_core::{MediaId, ModelSlug};

/// Failure talking to an external service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExternalError {
    /// Worth retrying with backoff (network blip, 5xx, 429, timeout).
    #[error("{0}")]
    Transient(String),
    /// Retrying will not help (4xx, missing source data, bad config).
    #[error("{0}")]
    Permanent(String),
}

impl ExternalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Transient(_))
    }
}

/// Resubmits a media file to the external moderation service.
#[async_trait]
pub trait ModerationSubmitter: Send + Sync {
    async fn submit(
        &self,
        model_slug: &ModelSlug,
        media_id: MediaId,
        file_path: &str,
        context_type: Option<&str>,
    ) -> Result<(), ExternalError>;
}

/// Delivers a signed JSON payload to a webhook URL.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(
        &self,
        url: &str,
        payload: &serde_json::Value,
        secret: &str,
    ) -> Result<(), ExternalError>;
}

pub(crate) fn classify_status(status: reqwest::StatusCode) -> ExternalError {
    let code = status.as_u16();
    match code {
        429 => ExternalError::Transient(format!("HTTP {code} (rate limited)")),
        500..=599 => ExternalError::Transient(format!("HTTP {code}")),
        _ => ExternalError::Permanent(format!("HTTP {code}")),
    }
}

pub(crate) fn classify_reqwest(err: &reqwest::Error) -> ExternalError {
    if err.is_timeout() {
        return ExternalError::Transient("request timed out".to_string());
    }
    if err.is_connect() {
        return ExternalError::Transient(format!("connection failed: {err}"));
    }
    ExternalError::Transient(format!("request failed: {err}"))
}
