//! Client for the external AI moderation service.

use async_trait::async_trait;
use std::path::Path;

use folio_core::{MediaId, ModelSlug};

use super::{classify_reqwest, classify_status, ExternalError, ModerationSubmitter};

/// HTTP client resubmitting media files for moderation (`UploadRetry`).
#[derive(Debug, Clone)]
pub struct HttpModerationSubmitter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpModerationSubmitter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ModerationSubmitter for HttpModerationSubmitter {
    async fn submit(
        &self,
        model_slug: &ModelSlug,
        media_id: MediaId,
        file_path: &str,
        context_type: Option<&str>,
    ) -> Result<(), ExternalError> {
        let bytes = tokio::fs::read(file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                // The staged file is gone; resubmitting later cannot succeed.
                ExternalError::Permanent(format!("source file missing: {file_path}"))
            } else {
                ExternalError::Transient(format!("read {file_path}: {e}"))
            }
        })?;

        let file_name = Path::new(file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("model_slug", model_slug.to_string())
            .text("media_id", media_id.to_string());
        if let Some(context) = context_type {
            form = form.text("context_type", context.to_string());
        }

        let response = self
            .client
            .post(format!("{}/api/v1/moderate", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_reqwest(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status()))
        }
    }
}
