//! Worker error types.

use modelconv_blender::ConversionError;
use modelconv_models::{ErrorCategory, ObjectLocator, ValidationError};
use modelconv_queue::QueueError;
use modelconv_storage::StorageError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that stop the worker itself (startup, queue plumbing).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Why a single job failed. Every variant ends in one failure notification.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Download of {locator} failed: {error}")]
    Download {
        locator: ObjectLocator,
        #[source]
        error: StorageError,
    },

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Upload to {locator} failed: {error}")]
    Upload {
        locator: ObjectLocator,
        #[source]
        error: StorageError,
    },
}

impl JobFailure {
    pub fn category(&self) -> ErrorCategory {
        match self {
            JobFailure::Validation(_) => ErrorCategory::Validation,
            JobFailure::Workspace(_) | JobFailure::Download { .. } | JobFailure::Upload { .. } => {
                ErrorCategory::Storage
            }
            JobFailure::Conversion(_) => ErrorCategory::Conversion,
        }
    }

    /// Text for the failure notification's `error` field.
    ///
    /// Validation errors name the field, storage errors carry the store's
    /// error code, and tool failures carry stderr unchanged.
    pub fn operator_message(&self) -> String {
        match self {
            JobFailure::Validation(e) => e.to_string(),
            JobFailure::Workspace(e) => format!("Failed to prepare workspace: {}", e),
            JobFailure::Download { locator, error } => {
                format!("Download of {} failed ({}): {}", locator, error.code(), error)
            }
            JobFailure::Upload { locator, error } => {
                format!("Upload to {} failed ({}): {}", locator, error.code(), error)
            }
            JobFailure::Conversion(e) => e.operator_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_field() {
        let failure = JobFailure::from(ValidationError::MissingFields(vec!["s3Key"]));
        assert_eq!(failure.category(), ErrorCategory::Validation);
        assert!(failure.operator_message().contains("s3Key"));
    }

    #[test]
    fn test_storage_message_carries_code() {
        let failure = JobFailure::Download {
            locator: ObjectLocator::new("models", "in/m1.blend"),
            error: StorageError::not_found("in/m1.blend"),
        };
        assert_eq!(failure.category(), ErrorCategory::Storage);
        let message = failure.operator_message();
        assert!(message.contains("NoSuchKey"));
        assert!(message.contains("s3://models/in/m1.blend"));
    }

    #[test]
    fn test_conversion_message_is_stderr() {
        let failure = JobFailure::from(ConversionError::ToolFailed {
            exit_code: Some(1),
            stderr: "Unknown node type".into(),
        });
        assert_eq!(failure.category(), ErrorCategory::Conversion);
        assert_eq!(failure.operator_message(), "Unknown node type");
    }

    #[test]
    fn test_long_stderr_survives_result_bound() {
        use modelconv_models::{ConversionResult, MAX_ERROR_LEN};

        let failure = JobFailure::from(ConversionError::ToolFailed {
            exit_code: Some(1),
            stderr: format!(
                "{}RuntimeError: Unknown node type",
                "Warning: deprecated add-on API\n".repeat(200)
            ),
        });
        let result = ConversionResult::failed("j1", failure.operator_message(), Some(failure.category()));
        let error = result.error().unwrap();
        assert!(error.len() <= MAX_ERROR_LEN);
        assert!(error.ends_with("RuntimeError: Unknown node type"));
    }
}
