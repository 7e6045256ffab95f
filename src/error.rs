//! Error types for kyro-resolve.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. The one that matters most in practice is
//! [`ResolverError::Conflict`]: batch tools log it and move on instead of
//! aborting a whole run.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised before anything reaches a backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid {prop_type} value for {schema}:{prop}: {value:?}")]
    InvalidValue {
        schema: String,
        prop: String,
        prop_type: String,
        value: String,
    },

    #[error("Unknown schema: {name}")]
    UnknownSchema {
        name: String,
    },

    #[error("Schema {schema} has no property {prop}")]
    UnknownProperty {
        schema: String,
        prop: String,
    },

    #[error("Schemata {left} and {right} have no common type")]
    IncompatibleSchemata {
        left: String,
        right: String,
    },

    #[error("Identifier is empty or contains control characters: {value:?}")]
    InvalidIdentifier {
        value: String,
    },

    #[error("Entity has no id")]
    MissingId,

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Errors raised by the identity resolver.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// A positive merge was attempted across a negative judgement, or a
    /// negative judgement was attempted inside an already merged cluster.
    #[error("Judgement conflict between {left} and {right}")]
    Conflict {
        left: String,
        right: String,
    },

    #[error("Cannot record a non-positive judgement between {id} and itself")]
    SelfJudgement {
        id: String,
    },

    #[error("Resolver journal error: {message}")]
    Journal {
        message: String,
    },
}

impl ResolverError {
    /// Returns true if this is a judgement conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<std::io::Error> for ResolverError {
    fn from(e: std::io::Error) -> Self {
        Self::Journal {
            message: e.to_string(),
        }
    }
}

/// Errors raised while building, saving or loading an index snapshot.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index build failed: {0}")]
    Storage(#[from] StorageError),
}

/// Top-level error type for kyro-resolve.
#[derive(Debug, Error)]
pub enum KyroError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl KyroError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error is a resolver judgement conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Resolver(ResolverError::Conflict { .. }))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for kyro-resolve operations.
pub type KyroResult<T> = Result<T, KyroError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_invalid_value() {
        let err = ValidationError::InvalidValue {
            schema: "Person".to_string(),
            prop: "birthDate".to_string(),
            prop_type: "date".to_string(),
            value: "yesterday".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Person:birthDate"));
        assert!(msg.contains("yesterday"));
    }

    #[test]
    fn test_conflict_is_distinct_kind() {
        let err: KyroError = ResolverError::Conflict {
            left: "a".to_string(),
            right: "b".to_string(),
        }
        .into();
        assert!(err.is_conflict());
        assert!(!err.is_validation());
        assert!(format!("{err}").contains("a and b"));
    }

    #[test]
    fn test_journal_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: ResolverError = io.into();
        assert!(!err.is_conflict());
        assert!(format!("{err}").contains("disk full"));
    }

    #[test]
    fn test_kyro_error_internal() {
        let err = KyroError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
