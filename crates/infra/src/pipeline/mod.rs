//! The moderation retry pipeline.
//!
//! ## Design
//!
//! - The operation store is the single source of scheduling truth
//! - The dispatcher routes claimed operations to typed handlers and never
//!   lets a handler failure escape to the runner
//! - Callback ingestion applies media updates all-or-nothing and stays
//!   idempotent under webhook re-delivery
//! - The runner drives everything off one timer, one batch at a time
//!
//! ## Components
//!
//! - `Dispatcher`: operation routing + in-process double-dispatch guard
//! - `CallbackIngestor`: inbound callback state machine
//! - `RetryRunner`: periodic driver with overlap guard and cleanup timer

pub mod dispatcher;
pub mod ingest;
pub mod runner;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use ingest::{CallbackIngestor, IngestOutcome, RejectReason};
pub use runner::{RetryRunner, RunReport};

#[cfg(test)]
pub(crate) mod testing {
    //! Shared scripted collaborators for pipeline tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use folio_core::{MediaId, ModelSlug};

    use crate::external::{ExternalError, ModerationSubmitter, WebhookSender};
    use crate::storage::{FileMover, MoveError, MoveOutcome, MoveRequest};

    /// Webhook sender that pops scripted outcomes (defaults to success) and
    /// optionally sleeps to simulate a slow endpoint.
    #[derive(Default)]
    pub struct ScriptedWebhookSender {
        pub delay: Option<Duration>,
        pub outcomes: Mutex<VecDeque<Result<(), ExternalError>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedWebhookSender {
        pub fn failing_with(error: ExternalError, times: usize) -> Self {
            let outcomes = (0..times).map(|_| Err(error.clone())).collect();
            Self {
                outcomes: Mutex::new(outcomes),
                ..Self::default()
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WebhookSender for ScriptedWebhookSender {
        async fn send(
            &self,
            _url: &str,
            _payload: &serde_json::Value,
            _secret: &str,
        ) -> Result<(), ExternalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    /// Mover that records requests and optionally fails every call.
    #[derive(Default)]
    pub struct RecordingMover {
        pub fail: bool,
        pub requests: Mutex<Vec<MoveRequest>>,
    }

    impl RecordingMover {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FileMover for RecordingMover {
        async fn move_media(&self, request: &MoveRequest) -> Result<MoveOutcome, MoveError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                Err(MoveError::Io("disk unavailable".to_string()))
            } else {
                Ok(MoveOutcome {
                    files_moved: 1,
                    ..MoveOutcome::default()
                })
            }
        }
    }

    /// Submitter that always succeeds.
    #[derive(Default)]
    pub struct NoopSubmitter {
        pub calls: AtomicU32,
    }

    #[async_trait]
    impl ModerationSubmitter for NoopSubmitter {
        async fn submit(
            &self,
            _model_slug: &ModelSlug,
            _media_id: MediaId,
            _file_path: &str,
            _context_type: Option<&str>,
        ) -> Result<(), ExternalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
