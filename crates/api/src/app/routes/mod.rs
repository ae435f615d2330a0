use axum::Router;

pub mod operations;
pub mod system;
pub mod webhooks;

/// Router for everything except the health check.
pub fn router() -> Router {
    Router::new()
        .nest("/webhooks", webhooks::router())
        .nest("/admin", operations::router())
}
