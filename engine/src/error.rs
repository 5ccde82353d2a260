//! Error types for the roster engine.
//!
//! Every failure a reconciliation or a single-entity command can report maps
//! onto one variant here. Store adapters translate their own driver errors
//! into these variants so nothing implementation-specific crosses the
//! [`UnitOfWork`](crate::UnitOfWork) boundary.

use thiserror::Error;

/// Boxed underlying cause kept for diagnostics.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All possible errors from the roster engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input was missing or malformed. Caller bug, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A by-id update or removal found no persisted record.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// The store rejected the batch on a constraint or concurrency check.
    #[error("persistence conflict: {message}")]
    PersistenceConflict {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Any other store-raised fault during fetch or apply.
    #[error("store failure: {message}")]
    StoreFailure {
        message: String,
        /// Whether re-running the whole pipeline may succeed.
        transient: bool,
        #[source]
        source: Option<BoxError>,
    },

    /// The filtered snapshot holds more than one record for a key.
    #[error("duplicate key in snapshot: {0}")]
    DuplicateSnapshotKey(String),

    /// The caller's cancellation token fired before commit began.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::EntityNotFound(message.into())
    }

    /// Constraint or concurrency violation raised at commit.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::PersistenceConflict {
            message: message.into(),
            source: None,
        }
    }

    /// Non-transient store failure.
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreFailure {
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    /// Store failure worth retrying (connection loss, pool timeout, ...).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::StoreFailure {
            message: message.into(),
            transient: true,
            source: None,
        }
    }

    /// Attach the underlying cause. No-op for variants that carry none.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::PersistenceConflict { source, .. } | Self::StoreFailure { source, .. } => {
                *source = Some(cause.into());
            }
            _ => {}
        }
        self
    }

    /// Returns true if re-running the operation may succeed.
    ///
    /// Only transient store failures qualify; conflicts must be resolved by
    /// the caller first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreFailure {
                transient: true,
                ..
            }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::PersistenceConflict { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn error_display() {
        let err = Error::invalid_argument("key extractor is required");
        assert_eq!(
            err.to_string(),
            "invalid argument: key extractor is required"
        );

        let err = Error::conflict("duplicate key value violates unique constraint");
        assert_eq!(
            err.to_string(),
            "persistence conflict: duplicate key value violates unique constraint"
        );

        let err = Error::DuplicateSnapshotKey("\"sku-1\"".into());
        assert_eq!(err.to_string(), "duplicate key in snapshot: \"sku-1\"");
    }

    #[test]
    fn retryable_errors() {
        assert!(Error::transient("connection reset").is_retryable());
        assert!(!Error::store("syntax error").is_retryable());
        assert!(!Error::conflict("unique violation").is_retryable());
        assert!(!Error::not_found("42").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer hung up");
        let err = Error::transient("lost connection").with_source(io);

        assert_eq!(err.to_string(), "store failure: lost connection");
        let source = err.source().expect("source kept");
        assert_eq!(source.to_string(), "peer hung up");
    }

    #[test]
    fn with_source_ignores_variants_without_cause() {
        let err = Error::not_found("7").with_source("boom");
        assert!(err.source().is_none());
        assert!(matches!(err, Error::EntityNotFound(_)));
    }
}
