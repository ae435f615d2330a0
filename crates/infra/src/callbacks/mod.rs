//! Durable per-callback state, keyed by correlation ids.

pub mod in_memory;
pub mod postgres;
pub mod store;

pub use in_memory::InMemoryCallbackStore;
pub use postgres::PostgresCallbackStore;
pub use store::{CallbackStore, CallbackStoreError};
