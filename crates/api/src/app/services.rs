//! Infrastructure wiring for the HTTP layer.
//!
//! `postgres` is the production wiring; `in_memory` backs the black-box
//! tests and local development without a database.

use std::sync::Arc;

use sqlx::PgPool;

use folio_infra::callbacks::{CallbackStore, InMemoryCallbackStore, PostgresCallbackStore};
use folio_infra::external::{HttpModerationSubmitter, HttpWebhookSender};
use folio_infra::media::{InMemoryMediaStore, MediaStore, PostgresMediaStore};
use folio_infra::operations::{InMemoryOperationStore, OperationStore, PostgresOperationStore};
use folio_infra::pipeline::{CallbackIngestor, Dispatcher, RetryRunner};
use folio_infra::storage::FsFileMover;
use folio_infra::{Config, RetrySettings};

/// Shared service graph handed to every handler via `Extension`.
pub struct AppServices {
    pub operations: Arc<dyn OperationStore>,
    pub media: Arc<dyn MediaStore>,
    pub callbacks: Arc<dyn CallbackStore>,
    pub ingestor: Arc<CallbackIngestor>,
    pub runner: Arc<RetryRunner>,
    pub webhook_secret: Option<String>,
    pub api_key: Option<String>,
}

impl AppServices {
    /// Production wiring: Postgres stores + real HTTP collaborators.
    pub fn postgres(pool: PgPool, cfg: &Config) -> Arc<Self> {
        let policy = cfg.retry.policy();
        let operations: Arc<dyn OperationStore> =
            Arc::new(PostgresOperationStore::new(pool.clone(), policy.clone()));
        let media: Arc<dyn MediaStore> = Arc::new(PostgresMediaStore::new(pool.clone()));
        let callbacks: Arc<dyn CallbackStore> = Arc::new(PostgresCallbackStore::new(pool));

        let mover = Arc::new(FsFileMover::new(cfg.base_upload_path.clone()));
        let submitter = Arc::new(HttpModerationSubmitter::new(cfg.moderation_api_url.clone()));
        let webhook = Arc::new(HttpWebhookSender::new(cfg.webhook_timeout));

        let ingestor = Arc::new(CallbackIngestor::new(
            callbacks.clone(),
            media.clone(),
            operations.clone(),
            mover.clone(),
            policy,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            submitter,
            ingestor.clone(),
            mover,
            webhook,
        ));
        let runner = Arc::new(RetryRunner::new(
            operations.clone(),
            dispatcher,
            cfg.retry.batch_size,
        ));

        Arc::new(Self {
            operations,
            media,
            callbacks,
            ingestor,
            runner,
            webhook_secret: cfg.webhook_secret.clone(),
            api_key: cfg.api_key.clone(),
        })
    }

    /// In-memory wiring with default retry settings.
    pub fn in_memory() -> Arc<Self> {
        Self::in_memory_with(RetrySettings::default(), None, None)
    }

    /// In-memory wiring with explicit settings and guards (tests).
    pub fn in_memory_with(
        settings: RetrySettings,
        webhook_secret: Option<String>,
        api_key: Option<String>,
    ) -> Arc<Self> {
        let policy = settings.policy();
        let operations: Arc<dyn OperationStore> =
            Arc::new(InMemoryOperationStore::new(policy.clone()));
        let media: Arc<dyn MediaStore> = Arc::new(InMemoryMediaStore::new());
        let callbacks: Arc<dyn CallbackStore> = Arc::new(InMemoryCallbackStore::new());

        let mover = Arc::new(FsFileMover::new(std::env::temp_dir().join("folio-media")));
        let submitter = Arc::new(HttpModerationSubmitter::new("http://127.0.0.1:5000"));
        let webhook = Arc::new(HttpWebhookSender::new(std::time::Duration::from_secs(30)));

        let ingestor = Arc::new(CallbackIngestor::new(
            callbacks.clone(),
            media.clone(),
            operations.clone(),
            mover.clone(),
            policy,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            submitter,
            ingestor.clone(),
            mover,
            webhook,
        ));
        let runner = Arc::new(RetryRunner::new(
            operations.clone(),
            dispatcher,
            settings.batch_size,
        ));

        Arc::new(Self {
            operations,
            media,
            callbacks,
            ingestor,
            runner,
            webhook_secret,
            api_key,
        })
    }
}
