//! `folio-moderation` — moderation pipeline domain model.
//!
//! ## Design
//!
//! - Retryable operations are a closed, typed set (no opaque payload blobs)
//! - Exponential backoff with jitter and a ceiling, pure and unit-testable
//! - Callback payloads validated up front; invalid input is never retried
//! - Media rows updated as a set from one resolved callback
//!
//! This crate is pure domain: no database, filesystem, or HTTP concerns.

pub mod backoff;
pub mod callback;
pub mod media;
pub mod operation;
pub mod status;

pub use backoff::RetryPolicy;
pub use callback::{CallbackError, CallbackPayload, CallbackRecord, CallbackStatus, ValidatedCallback};
pub use media::{MediaItem, ModerationUpdate};
pub use operation::{
    FailureDisposition, NewOperation, OperationKind, OperationStatus, RetryOperation,
};
pub use status::{ModerationStatus, RiskLevel};
