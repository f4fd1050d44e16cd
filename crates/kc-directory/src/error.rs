//! Directory error types.
//!
//! Every gateway operation fails with one of the base variants
//! (`Unauthorized`, `NotFound`, `Unreachable`, `Conflict`, `Invalid`).
//! Coordinators aggregate those into [`PartialFailure`] instead of
//! swallowing them.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while talking to, or coordinating across, clusters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// Credentials were rejected or lack the required permission.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested entity does not exist.
    #[error("{entity_type} not found: {id}")]
    NotFound {
        /// Type of entity (e.g., "User", "Client").
        entity_type: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Network failure, timeout, or server-side error.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// An entity with the same name already exists.
    #[error("{entity_type} already exists: {name}")]
    Conflict {
        /// Type of entity.
        entity_type: &'static str,
        /// Conflicting name.
        name: String,
    },

    /// Malformed request or response.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Some sub-operations of a batch failed.
    #[error("{0}")]
    PartialFailure(PartialFailure),

    /// The operation was cancelled before it was issued.
    #[error("operation cancelled")]
    Cancelled,
}

impl DirectoryError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(entity_type: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            entity_type,
            name: name.into(),
        }
    }

    /// Creates an unreachable error.
    #[must_use]
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable(reason.into())
    }

    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    /// Short, stable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unreachable(_) => ErrorKind::Unreachable,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::PartialFailure(_) => ErrorKind::PartialFailure,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Checks if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Checks if this is a conflict error.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Checks if this is an unreachable error.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Checks if this is an unauthorized error.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Invalid(format!("malformed response: {err}"))
        } else if err.is_builder() {
            Self::Invalid(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(format!("JSON error: {err}"))
    }
}

/// Error kind without payload, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// See [`DirectoryError::Unauthorized`].
    Unauthorized,
    /// See [`DirectoryError::NotFound`].
    NotFound,
    /// See [`DirectoryError::Unreachable`].
    Unreachable,
    /// See [`DirectoryError::Conflict`].
    Conflict,
    /// See [`DirectoryError::Invalid`].
    Invalid,
    /// See [`DirectoryError::PartialFailure`].
    PartialFailure,
    /// See [`DirectoryError::Cancelled`].
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthorized => "Unauthorized",
            Self::NotFound => "NotFound",
            Self::Unreachable => "Unreachable",
            Self::Conflict => "Conflict",
            Self::Invalid => "Invalid",
            Self::PartialFailure => "PartialFailure",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// One failed sub-operation of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTarget {
    /// Target label, e.g. `realm`, `client:app1`, `user:alice`.
    pub target: String,
    /// The error returned for that target.
    pub error: DirectoryError,
}

/// Per-target breakdown of a batch that did not fully succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialFailure {
    /// Targets that succeeded.
    pub succeeded: Vec<String>,
    /// Targets that failed, with their errors.
    pub failed: Vec<FailedTarget>,
}

impl PartialFailure {
    /// Labels of the failed targets.
    #[must_use]
    pub fn failed_targets(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.target.as_str()).collect()
    }

    /// Returns the error recorded for a target.
    #[must_use]
    pub fn error_for(&self, target: &str) -> Option<&DirectoryError> {
        self.failed
            .iter()
            .find(|f| f.target == target)
            .map(|f| &f.error)
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partial failure: {} succeeded, {} failed (",
            self.succeeded.len(),
            self.failed.len()
        )?;
        for (i, failed) in self.failed.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", failed.target, failed.error.kind())?;
        }
        f.write_str(")")
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error() {
        let err = DirectoryError::not_found("Client", "app1");

        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("app1"));
    }

    #[test]
    fn conflict_error() {
        let err = DirectoryError::conflict("User", "alice");

        assert!(err.is_conflict());
        assert!(err.to_string().contains("alice"));
    }

    #[test]
    fn partial_failure_lists_targets() {
        let failure = PartialFailure {
            succeeded: vec!["realm".to_string()],
            failed: vec![FailedTarget {
                target: "client:app1".to_string(),
                error: DirectoryError::unreachable("timeout"),
            }],
        };

        assert_eq!(failure.failed_targets(), vec!["client:app1"]);
        assert!(failure.error_for("client:app1").is_some_and(DirectoryError::is_unreachable));
        assert!(failure.error_for("realm").is_none());

        let rendered = DirectoryError::PartialFailure(failure).to_string();
        assert!(rendered.contains("client:app1: Unreachable"));
    }
}
