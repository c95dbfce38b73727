//! Status codes and the error type shared by every registry layer.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Canonical failure classes surfaced by registry operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryCode {
    AlreadyExists,
    NotFound,
    InvalidMetadata,
    InvalidFilter,
    QuotaExceeded,
    VersionConflict,
    BackendUnavailable,
    InvalidArgument,
    InvalidConfiguration,
}

impl RegistryCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryCode::AlreadyExists => "ALREADY_EXISTS",
            RegistryCode::NotFound => "NOT_FOUND",
            RegistryCode::InvalidMetadata => "INVALID_METADATA",
            RegistryCode::InvalidFilter => "INVALID_FILTER",
            RegistryCode::QuotaExceeded => "QUOTA_EXCEEDED",
            RegistryCode::VersionConflict => "VERSION_CONFLICT",
            RegistryCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            RegistryCode::InvalidArgument => "INVALID_ARGUMENT",
            RegistryCode::InvalidConfiguration => "INVALID_CONFIGURATION",
        }
    }
}

impl Display for RegistryCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed registry call: a [`RegistryCode`] plus a human-readable message.
///
/// Equality compares codes only, so tests can assert on the failure class without
/// pinning message wording.
#[derive(Clone, Debug)]
pub struct RegistryError {
    pub code: RegistryCode,
    pub message: String,
}

impl RegistryError {
    pub fn fail_with_code(code: RegistryCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn already_exists(identity: &str) -> Self {
        Self::fail_with_code(
            RegistryCode::AlreadyExists,
            format!("identity '{identity}' is already registered"),
        )
    }

    pub fn not_found(identity: &str) -> Self {
        Self::fail_with_code(
            RegistryCode::NotFound,
            format!("identity '{identity}' is not registered"),
        )
    }

    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::fail_with_code(RegistryCode::InvalidMetadata, message)
    }

    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::fail_with_code(RegistryCode::InvalidFilter, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::fail_with_code(RegistryCode::InvalidArgument, message)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::fail_with_code(RegistryCode::InvalidConfiguration, message)
    }

    pub fn backend_unavailable(slot: &str, message: impl Display) -> Self {
        Self::fail_with_code(
            RegistryCode::BackendUnavailable,
            format!("{slot} backend unavailable: {message}"),
        )
    }

    pub fn version_conflict(identity: &str, expected: u64, actual: u64) -> Self {
        Self::fail_with_code(
            RegistryCode::VersionConflict,
            format!("identity '{identity}' is at version {actual}, expected {expected}"),
        )
    }

    /// Returns `true` for failures worth retrying on idempotent reads.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            RegistryCode::BackendUnavailable | RegistryCode::VersionConflict
        )
    }
}

impl PartialEq for RegistryError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for RegistryError {}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for RegistryError {}
