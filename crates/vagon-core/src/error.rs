//! Error types module
//!
//! `AppError` unifies the failures of every layer (transfer, decode, detection,
//! persistence) so that the HTTP layer can render them consistently through
//! the `ErrorMetadata` trait.
//!
//! The `Database` variant wraps `sqlx::Error` when the `sqlx` feature is on and
//! falls back to a plain message otherwise.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors such as validation failures
    Debug,
    /// Recoverable issues such as a full job queue
    Warn,
    /// Unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "INCOMPLETE_UPLOAD")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Upload {file_id} is incomplete: missing chunks {missing:?}")]
    IncompleteUpload { file_id: String, missing: Vec<u32> },

    #[error("Declared size {declared} bytes does not match assembled size {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Upload aborted: {0}")]
    UploadAborted(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce file size or chunk size"),
            false,
            LogLevel::Debug,
        ),
        AppError::IncompleteUpload { .. } => (
            409,
            "INCOMPLETE_UPLOAD",
            true,
            Some("Re-send the missing chunks and finalize again"),
            false,
            LogLevel::Debug,
        ),
        AppError::SizeMismatch { .. } => (
            422,
            "SIZE_MISMATCH",
            true,
            Some("Re-send the chunks or correct the declared file size"),
            false,
            LogLevel::Warn,
        ),
        AppError::UploadAborted(_) => (
            410,
            "UPLOAD_ABORTED",
            false,
            Some("Start a new upload with a fresh file id"),
            false,
            LogLevel::Debug,
        ),
        AppError::Decode(_) => (
            422,
            "DECODE_ERROR",
            false,
            Some("Check the media format and try a different file"),
            false,
            LogLevel::Warn,
        ),
        AppError::Detection(_) => (
            502,
            "DETECTION_ERROR",
            true,
            Some("Retry after a short delay"),
            false,
            LogLevel::Warn,
        ),
        AppError::QueueFull(_) => (
            503,
            "QUEUE_FULL",
            true,
            Some("Wait 30-60 seconds and retry"),
            false,
            LogLevel::Warn,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::IncompleteUpload { .. } => "IncompleteUpload",
            AppError::SizeMismatch { .. } => "SizeMismatch",
            AppError::UploadAborted(_) => "UploadAborted",
            AppError::Decode(_) => "Decode",
            AppError::Detection(_) => "Detection",
            AppError::QueueFull(_) => "QueueFull",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::IncompleteUpload { file_id, missing } => format!(
                "Upload {} is missing {} chunk(s): {:?}",
                file_id,
                missing.len(),
                missing
            ),
            AppError::SizeMismatch { declared, actual } => format!(
                "Declared size {} bytes does not match received {} bytes",
                declared, actual
            ),
            AppError::UploadAborted(ref msg) => msg.clone(),
            AppError::Decode(ref msg) => msg.clone(),
            AppError::Detection(ref msg) => msg.clone(),
            AppError::QueueFull(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_incomplete_upload() {
        let err = AppError::IncompleteUpload {
            file_id: "abc".to_string(),
            missing: vec![1, 4],
        };
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "INCOMPLETE_UPLOAD");
        assert!(err.is_recoverable());
        assert!(err.client_message().contains("abc"));
        assert!(err.client_message().contains("[1, 4]"));
        assert!(!err.is_sensitive());
    }

    #[test]
    fn test_error_metadata_size_mismatch() {
        let err = AppError::SizeMismatch {
            declared: 1000,
            actual: 2000,
        };
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.error_code(), "SIZE_MISMATCH");
        assert!(err.client_message().contains("1000"));
        assert!(err.client_message().contains("2000"));
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_error_metadata_decode_is_not_recoverable() {
        let err = AppError::Decode("moov atom not found".to_string());
        assert_eq!(err.http_status_code(), 422);
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "moov atom not found");
    }

    #[test]
    fn test_error_metadata_suggested_actions() {
        let err1 = AppError::QueueFull("busy".to_string());
        assert_eq!(err1.suggested_action(), Some("Wait 30-60 seconds and retry"));

        let err2 = AppError::NotFound("test".to_string());
        assert_eq!(
            err2.suggested_action(),
            Some("Verify the resource ID exists")
        );

        let err3 = AppError::InvalidInput("test".to_string());
        assert_eq!(
            err3.suggested_action(),
            Some("Check request parameters and try again")
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = AppError::from(anyhow::anyhow!("ffmpeg exploded at /tmp/x"));
        assert_eq!(err.client_message(), "Internal server error");
        assert!(err.is_sensitive());
        assert!(err.detailed_message().contains("ffmpeg exploded"));
    }
}
