/*!
Error types for the Strata core engine.
*/

use strata_retry::RetryableError;
use thiserror::Error;

/// Result type used throughout the Strata core.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur during snapshot, query and migration operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// No such media package / version, or it belongs to another organization
    #[error("Not found: {0}")]
    NotFound(String),

    /// A snapshot with the same media package id and version already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The row changed underneath an optimistic update
    #[error("Stale write: {0}")]
    StaleWrite(String),

    /// Unknown or unreachable storage tier
    #[error("Invalid target storage tier: {0}")]
    InvalidTarget(String),

    /// Malformed query or input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage tier temporarily unreachable; retryable
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Benign migration race; the losing job cleaned up after itself
    #[error("Aborted: {0}")]
    Aborted(String),

    /// A bounded operation did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Integrity check failures
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid persisted format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StrataError {
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn stale_write<S: Into<String>>(msg: S) -> Self {
        Self::StaleWrite(msg.into())
    }

    pub fn invalid_target<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTarget(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn aborted<S: Into<String>>(msg: S) -> Self {
        Self::Aborted(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// True for `NotFound`; callers use this to map tenant-invisible rows
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl RetryableError for StrataError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StrataError::not_found("mp-1@v3");
        assert_eq!(err.to_string(), "Not found: mp-1@v3");

        let err = StrataError::IntegrityCheckFailed {
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        assert!(err.to_string().contains("expected hash abc"));
        assert!(err.to_string().contains("got def"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: StrataError = io.into();
        assert!(matches!(err, StrataError::Io(_)));
    }

    #[test]
    fn test_only_backend_unavailable_is_transient() {
        assert!(StrataError::backend_unavailable("cold tier down").is_transient());
        assert!(!StrataError::timeout("copy").is_transient());
        assert!(!StrataError::stale_write("row moved").is_transient());
        assert!(StrataError::validation("bad").is_permanent());
    }
}
