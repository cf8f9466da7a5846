//! Error types for the blockctl request-handling core.

use std::fmt;

use thiserror::Error;

use crate::version::ApiVersion;

/// Discriminant of an [`ApiError`], for callers that match on the kind
/// rather than on the full variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The endpoint or field does not exist at the negotiated version.
    VersionNotFound,
    /// The version token could not be parsed.
    InvalidVersion,
    /// The version is outside the range this service implements.
    UnsupportedVersion,
    /// Malformed filter value, identifier or pagination parameter.
    InvalidInput,
    /// A referenced volume or snapshot does not exist.
    NotFound,
    /// The snapshot does not belong to, or is not the latest of, the volume.
    Mismatch,
    /// A conditional status update lost a race.
    Conflict,
    /// Tenant-scope violation.
    Forbidden,
    /// Store or worker failure.
    Backend,
}

impl ErrorKind {
    /// Stable snake_case name used in error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::VersionNotFound => "version_not_found",
            ErrorKind::InvalidVersion => "invalid_version",
            ErrorKind::UnsupportedVersion => "unsupported_version",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Mismatch => "mismatch",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Backend => "backend",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of resource a [`ApiError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A volume.
    Volume,
    /// A volume snapshot.
    Snapshot,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Volume => f.write_str("volume"),
            ResourceKind::Snapshot => f.write_str("snapshot"),
        }
    }
}

/// Errors surfaced by every component of the core.
///
/// None of these are retried internally: they are either caller-correctable
/// or the expected outcome of a concurrent state change.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// The negotiated version is below the minimum of the requested method.
    #[error("API method {method} is not available at version {version}")]
    VersionNotFound {
        /// Method or field name.
        method: &'static str,
        /// Negotiated version.
        version: ApiVersion,
    },

    /// The version token is malformed.
    #[error("invalid API version token: {0:?}")]
    InvalidVersion(String),

    /// The version is well-formed but not served.
    #[error("version {version} is not supported, supported range is {min} to {max}")]
    UnsupportedVersion {
        /// Requested version.
        version: ApiVersion,
        /// Lowest served version.
        min: ApiVersion,
        /// Highest served version.
        max: ApiVersion,
    },

    /// A request parameter failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced resource does not exist or is not visible.
    #[error("{kind} {id} could not be found")]
    NotFound {
        /// Volume or snapshot.
        kind: ResourceKind,
        /// Identifier as supplied by the caller.
        id: String,
    },

    /// The snapshot cannot be used with the target volume.
    #[error("{0}")]
    Mismatch(String),

    /// A conditional update failed because the state changed concurrently.
    #[error("{message}")]
    Conflict {
        /// Description of the conflicting transition.
        message: String,
        /// Failure of the compensating write, if one was needed and failed.
        rollback_error: Option<String>,
    },

    /// The caller may not act on the requested tenant scope.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Persistence or worker collaborator failure.
    #[error("backend error: {message}")]
    Backend {
        /// What failed.
        message: String,
        /// Failure of the compensating write, if one was needed and failed.
        rollback_error: Option<String>,
    },
}

impl ApiError {
    /// Shorthand for a conflict without a rollback failure.
    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict {
            message: message.into(),
            rollback_error: None,
        }
    }

    /// Shorthand for a backend failure without a rollback failure.
    pub fn backend(message: impl Into<String>) -> Self {
        ApiError::Backend {
            message: message.into(),
            rollback_error: None,
        }
    }

    /// Failure of the compensating write attached to this error, if any.
    pub fn rollback_error(&self) -> Option<&str> {
        match self {
            ApiError::Conflict { rollback_error, .. } | ApiError::Backend { rollback_error, .. } => {
                rollback_error.as_deref()
            }
            _ => None,
        }
    }

    /// Attach a failed compensation to this error.
    ///
    /// Conflicts and backend errors carry it as is. Any other error is
    /// turned into a backend error, since the store was left inconsistent.
    pub fn with_rollback_error(self, rollback: Option<String>) -> Self {
        let Some(rollback) = rollback else {
            return self;
        };
        match self {
            ApiError::Conflict { message, .. } => ApiError::Conflict {
                message,
                rollback_error: Some(rollback),
            },
            ApiError::Backend { message, .. } => ApiError::Backend {
                message,
                rollback_error: Some(rollback),
            },
            other => ApiError::Backend {
                message: other.to_string(),
                rollback_error: Some(rollback),
            },
        }
    }

    /// Discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::VersionNotFound { .. } => ErrorKind::VersionNotFound,
            ApiError::InvalidVersion(_) => ErrorKind::InvalidVersion,
            ApiError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            ApiError::InvalidInput(_) => ErrorKind::InvalidInput,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::Mismatch(_) => ErrorKind::Mismatch,
            ApiError::Conflict { .. } => ErrorKind::Conflict,
            ApiError::Forbidden(_) => ErrorKind::Forbidden,
            ApiError::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// HTTP status code the API layer answers with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::VersionNotFound | ErrorKind::NotFound => 404,
            ErrorKind::InvalidVersion | ErrorKind::InvalidInput | ErrorKind::Mismatch => 400,
            ErrorKind::UnsupportedVersion => 406,
            ErrorKind::Conflict => 409,
            ErrorKind::Forbidden => 403,
            ErrorKind::Backend => 500,
        }
    }
}

/// Result alias used across the core.
pub type Result<T> = std::result::Result<T, ApiError>;
