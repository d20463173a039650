//! Validation error types.

use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Why an intake message could not be turned into a job descriptor.
///
/// Every variant names the offending field so the failure notification is
/// diagnosable without the original message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Malformed message body: {0}")]
    MalformedBody(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unsupported {field} value: {value}")]
    UnsupportedFormat { field: &'static str, value: String },

    #[error("Unsupported conversion from {from} to {to}")]
    UnsupportedPair { from: String, to: String },

    #[error("Unsupported job type: {0}")]
    UnsupportedJobType(String),
}

impl ValidationError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedBody(msg.into())
    }

    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Names of the fields this error is about, if any.
    pub fn fields(&self) -> Vec<&'static str> {
        match self {
            ValidationError::MissingFields(fields) => fields.clone(),
            ValidationError::InvalidField { field, .. }
            | ValidationError::UnsupportedFormat { field, .. } => vec![field],
            ValidationError::UnsupportedPair { .. } => vec!["fromFileType", "toFileType"],
            ValidationError::UnsupportedJobType(_) => vec!["jobType"],
            ValidationError::MalformedBody(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message_lists_every_field() {
        let err = ValidationError::MissingFields(vec!["modelId", "s3Key"]);
        assert_eq!(err.to_string(), "Missing required fields: modelId, s3Key");
        assert_eq!(err.fields(), vec!["modelId", "s3Key"]);
    }

    #[test]
    fn test_pair_error_names_both_fields() {
        let err = ValidationError::UnsupportedPair {
            from: "glb".into(),
            to: "blend".into(),
        };
        assert_eq!(err.fields(), vec!["fromFileType", "toFileType"]);
    }
}
