use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use folio_api::app::{self, services::AppServices};
use folio_infra::pipeline::RetryRunner;
use folio_infra::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    folio_observability::init();

    // Load .env (local dev)
    dotenvy::dotenv().ok();

    let cfg = Config::from_env()?;
    tracing::info!(host = %cfg.host, port = cfg.port, "config loaded");
    if cfg.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET is not set; inbound callbacks are unsigned");
    }
    if cfg.api_key.is_none() {
        tracing::warn!("API_KEY is not set; admin routes are unguarded");
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("db connected + migrations applied");

    let services = AppServices::postgres(pool, &cfg);

    // Background timers: the retry loop and terminal-row cleanup.
    let _runner = services.runner.clone().spawn(cfg.retry.retry_interval());
    let _cleanup = RetryRunner::spawn_cleanup(
        services.operations.clone(),
        cfg.retry.retention_days,
        Duration::from_secs(24 * 60 * 60),
    );

    let app = app::build_app(services);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
