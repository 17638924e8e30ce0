//! Error types for Cairn.

use thiserror::Error;

/// Common error type for Cairn.
#[derive(Error, Debug)]
pub enum CairnError {
    /// Metadata store error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A caller handed in an argument that violates a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Validation error for stored or configured data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Presigned URL failed verification.
    #[error("signature error: {0}")]
    Signature(String),

    /// The task pool no longer accepts work.
    #[error("task pool is shut down")]
    PoolShutdown,

    /// A pooled task panicked or was aborted.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// A retried operation failed on every attempt.
    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: Box<CairnError>,
    },
}

impl From<sqlx::Error> for CairnError {
    fn from(e: sqlx::Error) -> Self {
        CairnError::Database(e.to_string())
    }
}

impl From<globset::Error> for CairnError {
    fn from(e: globset::Error) -> Self {
        CairnError::Config(format!("invalid glob pattern: {e}"))
    }
}

/// Result type alias for Cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = CairnError::InvalidArgument("path must start with '/'".to_string());
        assert_eq!(err.to_string(), "invalid argument: path must start with '/'");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = CairnError::NotFound("object".to_string());
        assert_eq!(err.to_string(), "object not found");
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = CairnError::RetriesExhausted {
            attempts: 3,
            source: Box::new(CairnError::Storage("disk full".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "operation failed after 3 attempts: storage error: disk full"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "storage error: disk full");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CairnError = io_err.into();
        assert!(matches!(err, CairnError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let err: CairnError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CairnError::Database(_)));
    }

    #[test]
    fn test_glob_error_conversion() {
        let glob_err = globset::Glob::new("a[").unwrap_err();
        let err: CairnError = glob_err.into();
        assert!(matches!(err, CairnError::Config(_)));
    }
}
