//! Media row persistence and the atomic batch moderation update.

pub mod in_memory;
pub mod postgres;
pub mod store;

pub use in_memory::InMemoryMediaStore;
pub use postgres::PostgresMediaStore;
pub use store::{MediaStore, MediaStoreError};
