//! Black-box tests: the real router on an ephemeral port, in-memory stores.

use std::sync::Arc;

use serde_json::json;

use folio_api::app::services::AppServices;
use folio_core::BatchId;
use folio_infra::external::webhook as signing;
use folio_infra::media::MediaStore;
use folio_infra::RetrySettings;
use folio_moderation::MediaItem;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: Arc<AppServices>) -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = folio_api::app::build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    async fn seed_batch(&self, batch: &str, n: usize) {
        let slug = folio_core::ModelSlug::new("ava").unwrap();
        for i in 0..n {
            let media = MediaItem::new(slug.clone(), format!("photo-{i}.jpg"))
                .with_batch_id(BatchId::new(batch).unwrap());
            self.services.media.insert(&media).await.unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn approved_callback_updates_media_and_is_idempotent() {
    let server = TestServer::spawn(AppServices::in_memory()).await;
    server.seed_batch("B1", 3).await;
    let client = reqwest::Client::new();

    let body = json!({
        "moderation_status": "approved",
        "batch_id": "B1",
        "moderation_score": 8.5,
    });

    let response = client
        .post(format!("{}/webhooks/moderation", server.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let parsed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(parsed["success"], true);
    assert_eq!(parsed["updated_media_count"], 3);

    // Re-delivery of the same callback is a safe no-op.
    let response = client
        .post(format!("{}/webhooks/moderation", server.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let parsed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(parsed["success"], true);
    assert_eq!(parsed["updated_media_count"], 0);
    assert_eq!(parsed["already_processed"], true);
}

#[tokio::test]
async fn callback_without_correlation_keys_is_rejected() {
    let server = TestServer::spawn(AppServices::in_memory()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/webhooks/moderation", server.base_url))
        .json(&json!({ "moderation_status": "approved" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let parsed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(parsed["success"], false);
}

#[tokio::test]
async fn stale_callback_returns_not_found() {
    let server = TestServer::spawn(AppServices::in_memory()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/webhooks/moderation", server.base_url))
        .json(&json!({ "moderation_status": "approved", "batch_id": "nope" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signed_webhooks_reject_bad_signatures() {
    let services = AppServices::in_memory_with(
        RetrySettings::default(),
        Some("cb-secret".to_string()),
        None,
    );
    let server = TestServer::spawn(services).await;
    server.seed_batch("B2", 1).await;
    let client = reqwest::Client::new();
    let url = format!("{}/webhooks/moderation", server.base_url);

    let body = serde_json::to_vec(&json!({
        "moderation_status": "approved",
        "batch_id": "B2",
    }))
    .unwrap();

    // Unsigned request is refused.
    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Properly signed request goes through.
    let ts = chrono::Utc::now().timestamp();
    let header = signing::signature_header("cb-secret", ts, &body);
    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("X-Signature", header)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_expose_stats_and_honor_the_api_key() {
    let services = AppServices::in_memory_with(
        RetrySettings::default(),
        None,
        Some("admin-key".to_string()),
    );
    let server = TestServer::spawn(services).await;
    let client = reqwest::Client::new();
    let stats_url = format!("{}/admin/operations/stats", server.base_url);

    let response = client.get(&stats_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let response = client
        .get(&stats_url)
        .header("X-Api-Key", "admin-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let parsed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(parsed["pending"], 0);

    let response = client
        .post(format!("{}/admin/operations/run", server.base_url))
        .header("X-Api-Key", "admin-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let report: serde_json::Value = response.json().await.unwrap();
    assert_eq!(report["skipped"], false);
    assert_eq!(report["processed"], 0);
}

#[tokio::test]
async fn health_is_open() {
    let server = TestServer::spawn(AppServices::in_memory()).await;
    let response = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}
