//! Routes claimed operations to their handlers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use folio_core::OperationId;
use folio_moderation::{OperationKind, RetryOperation};

use crate::external::{ExternalError, ModerationSubmitter, WebhookSender};
use crate::pipeline::ingest::{CallbackIngestor, IngestOutcome};
use crate::storage::{FileMover, MoveRequest};

/// Result of dispatching one operation. Handler failures are folded in
/// here; dispatching never propagates an error to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failure {
        error: String,
        /// Retrying will not help; the runner fails the operation outright.
        permanent: bool,
    },
    /// The same operation id is still being processed in this process.
    AlreadyProcessing,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success)
    }

    fn transient(error: impl Into<String>) -> Self {
        DispatchOutcome::Failure {
            error: error.into(),
            permanent: false,
        }
    }

    fn permanent(error: impl Into<String>) -> Self {
        DispatchOutcome::Failure {
            error: error.into(),
            permanent: true,
        }
    }
}

impl From<ExternalError> for DispatchOutcome {
    fn from(err: ExternalError) -> Self {
        DispatchOutcome::Failure {
            permanent: !err.is_transient(),
            error: err.to_string(),
        }
    }
}

/// Routes operations by kind to the four pipeline collaborators.
pub struct Dispatcher {
    submitter: Arc<dyn ModerationSubmitter>,
    ingestor: Arc<CallbackIngestor>,
    mover: Arc<dyn FileMover>,
    webhook: Arc<dyn WebhookSender>,
    /// Operations currently being processed in this process. A slow handler
    /// must not be dispatched a second time by an overlapping run.
    in_flight: Mutex<HashSet<OperationId>>,
}

impl Dispatcher {
    pub fn new(
        submitter: Arc<dyn ModerationSubmitter>,
        ingestor: Arc<CallbackIngestor>,
        mover: Arc<dyn FileMover>,
        webhook: Arc<dyn WebhookSender>,
    ) -> Self {
        Self {
            submitter,
            ingestor,
            mover,
            webhook,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Process one claimed operation.
    pub async fn process(&self, operation: &RetryOperation) -> DispatchOutcome {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(operation.id) {
                warn!(operation_id = %operation.id, "operation already processing");
                return DispatchOutcome::AlreadyProcessing;
            }
        }

        debug!(
            operation_id = %operation.id,
            kind = operation.kind.name(),
            attempt = operation.retry_count + 1,
            "dispatching operation"
        );
        let outcome = self.execute(operation).await;

        self.in_flight.lock().unwrap().remove(&operation.id);
        outcome
    }

    async fn execute(&self, operation: &RetryOperation) -> DispatchOutcome {
        match &operation.kind {
            OperationKind::UploadRetry {
                model_slug,
                media_id,
                file_path,
                context_type,
            } => match self
                .submitter
                .submit(model_slug, *media_id, file_path, context_type.as_deref())
                .await
            {
                Ok(()) => DispatchOutcome::Success,
                Err(e) => e.into(),
            },

            OperationKind::CallbackRetry { payload } => {
                match self.ingestor.reingest(payload.clone()).await {
                    IngestOutcome::Applied { .. } | IngestOutcome::AlreadyProcessed => {
                        DispatchOutcome::Success
                    }
                    IngestOutcome::Rejected { error, .. } => DispatchOutcome::permanent(error),
                    IngestOutcome::Deferred { error, .. } => DispatchOutcome::transient(error),
                }
            }

            OperationKind::FileStorageMove {
                model_slug,
                media_id,
                file_name,
                thumb_name,
                target_status,
            } => {
                let request = MoveRequest {
                    model_slug: model_slug.clone(),
                    media_id: *media_id,
                    file_name: file_name.clone(),
                    thumb_name: thumb_name.clone(),
                    target_status: *target_status,
                };
                match self.mover.move_media(&request).await {
                    Ok(outcome) => {
                        if !outcome.partial_errors.is_empty() {
                            warn!(
                                operation_id = %operation.id,
                                errors = ?outcome.partial_errors,
                                "file move completed partially"
                            );
                        }
                        DispatchOutcome::Success
                    }
                    Err(e) if e.is_transient() => DispatchOutcome::transient(e.to_string()),
                    Err(e) => DispatchOutcome::permanent(e.to_string()),
                }
            }

            OperationKind::WebhookNotification {
                url,
                payload,
                secret,
            } => match self.webhook.send(url, payload, secret).await {
                Ok(()) => DispatchOutcome::Success,
                Err(e) => e.into(),
            },
        }
    }
}
