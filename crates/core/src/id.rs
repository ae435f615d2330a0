//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a retryable pipeline operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

/// Identifier of a media item (photo/video row).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(OperationId, "OperationId");
impl_uuid_newtype!(MediaId, "MediaId");

/// Correlation key for a single moderation submission.
///
/// Issued by the external moderation service; opaque to us beyond basic
/// shape checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

/// Correlation key grouping a multi-file upload into one moderation call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

macro_rules! impl_key_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            const MAX_LENGTH: usize = 128;

            /// Validate and wrap an externally-issued key.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into().trim().to_string();
                if value.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, " cannot be empty")));
                }
                if value.len() > Self::MAX_LENGTH {
                    return Err(DomainError::invalid_id(format!(
                        "{} exceeds {} characters",
                        $name,
                        Self::MAX_LENGTH
                    )));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_key_newtype!(TrackingId, "TrackingId");
impl_key_newtype!(BatchId, "BatchId");

/// URL/path-safe slug identifying a model's portfolio site.
///
/// Interpolated into filesystem paths by the storage layer, so the charset
/// is restricted to `[a-z0-9-_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelSlug(String);

impl ModelSlug {
    const MAX_LENGTH: usize = 64;

    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(DomainError::invalid_id("ModelSlug cannot be empty"));
        }
        if value.len() > Self::MAX_LENGTH {
            return Err(DomainError::invalid_id(format!(
                "ModelSlug exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(DomainError::invalid_id(
                "ModelSlug contains invalid characters (allowed: a-z, 0-9, -, _)",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ModelSlug {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModelSlug {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_id_trims_and_validates() {
        let id = TrackingId::new("  trk-20250101-001  ").unwrap();
        assert_eq!(id.as_str(), "trk-20250101-001");

        assert!(TrackingId::new("").is_err());
        assert!(TrackingId::new("   ").is_err());
        assert!(TrackingId::new("x".repeat(129)).is_err());
    }

    #[test]
    fn model_slug_rejects_path_hostile_input() {
        assert!(ModelSlug::new("ava-marie_02").is_ok());
        assert!(ModelSlug::new("../etc").is_err());
        assert!(ModelSlug::new("Ava Marie").is_err());
        assert!(ModelSlug::new("ava/marie").is_err());
    }

    #[test]
    fn operation_id_round_trips_via_str() {
        let id = OperationId::new();
        let parsed: OperationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
