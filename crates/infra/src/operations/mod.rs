//! Durable store for retryable operations.
//!
//! The store is the single source of truth for what runs next: due-operation
//! fetching *claims* rows (conditional update to `processing`), so at most
//! one worker holds an operation at a time regardless of how many processes
//! poll the same database.

pub mod in_memory;
pub mod postgres;
pub mod store;

pub use in_memory::InMemoryOperationStore;
pub use postgres::PostgresOperationStore;
pub use store::{OperationStats, OperationStore, OperationStoreError};
