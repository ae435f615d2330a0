//! Observability wiring for the pipeline service.

pub mod tracing;

pub use tracing::init;
