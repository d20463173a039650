//! Storage error types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Refusing to upload empty file: {0}")]
    EmptyUpload(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_) | StorageError::Timeout(_))
    }

    /// Whether the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Short, stable error code for operator-facing messages.
    pub fn code(&self) -> &str {
        match self {
            StorageError::ConfigError(_) => "ConfigError",
            StorageError::NotFound(_) => "NoSuchKey",
            StorageError::AccessDenied(_) => "AccessDenied",
            StorageError::Rejected { code, .. } => code.as_str(),
            StorageError::Transient(_) => "Transient",
            StorageError::Timeout(_) => "Timeout",
            StorageError::EmptyUpload(_) => "EmptyUpload",
            StorageError::Io(_) => "IoError",
        }
    }

    /// Classify a service response by error code and HTTP status.
    pub fn from_service(code: Option<&str>, status: Option<u16>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code {
            Some("NoSuchKey") | Some("NoSuchBucket") | Some("NotFound") => {
                return StorageError::NotFound(detail)
            }
            Some("AccessDenied")
            | Some("Forbidden")
            | Some("InvalidAccessKeyId")
            | Some("SignatureDoesNotMatch")
            | Some("AllAccessDisabled") => return StorageError::AccessDenied(detail),
            Some("SlowDown")
            | Some("InternalError")
            | Some("ServiceUnavailable")
            | Some("RequestTimeout")
            | Some("RequestTimeTooSkewed") => return StorageError::Transient(detail),
            _ => {}
        }

        match status {
            Some(404) => StorageError::NotFound(detail),
            Some(401) | Some(403) => StorageError::AccessDenied(detail),
            Some(408) | Some(429) => StorageError::Transient(detail),
            Some(s) if s >= 500 => StorageError::Transient(detail),
            Some(s) => StorageError::Rejected {
                code: code.map(str::to_string).unwrap_or_else(|| format!("Http{}", s)),
                message: detail,
            },
            None => StorageError::Transient(detail),
        }
    }
}
