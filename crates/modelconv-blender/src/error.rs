//! Error types for conversion operations.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use modelconv_models::{truncate_message_tail, MAX_ERROR_LEN};
use thiserror::Error;

/// Room left for the context wrapped around tool stderr.
const STDERR_BUDGET: usize = MAX_ERROR_LEN - 256;

/// Result type for conversion operations.
pub type BlenderResult<T> = Result<T, ConversionError>;

/// Step of a multi-stage conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The external tool exports the (intermediate) file
    Export,
    /// The exported file is packaged into the final archive
    Package,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Export => "export",
            Stage::Package => "package",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while producing a converted file.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Conversion tool not found: {0}")]
    ToolNotFound(String),

    #[error("Failed to start conversion tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Conversion tool timed out after {}s", .limit.as_secs())]
    Timeout { limit: Duration, stderr: String },

    #[error("Conversion tool exited with {}: {stderr}", exit_code_label(*.exit_code))]
    ToolFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Output file not determinable: {0}")]
    OutputUndeterminable(String),

    #[error("Output file missing: {0}")]
    OutputMissing(PathBuf),

    #[error("Output file is empty: {0}")]
    OutputEmpty(PathBuf),

    #[error("Packaging failed: {0}")]
    Packaging(String),

    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<ConversionError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

impl ConversionError {
    /// Attribute this error to a stage of a multi-stage conversion.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ ConversionError::StageFailed { .. } => already,
            other => ConversionError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ConversionError::Timeout { .. } => true,
            ConversionError::StageFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Text for the failure notification.
    ///
    /// Tool failures carry the captured stderr verbatim; it is the primary
    /// diagnostic and is not summarized.
    pub fn operator_message(&self) -> String {
        match self {
            ConversionError::ToolFailed { exit_code, stderr } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("Conversion tool exited with {}", exit_code_label(*exit_code))
                } else {
                    truncate_message_tail(stderr, STDERR_BUDGET)
                }
            }
            ConversionError::Timeout { limit, stderr } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("Conversion timed out after {}s", limit.as_secs())
                } else {
                    format!(
                        "Conversion timed out after {}s: {}",
                        limit.as_secs(),
                        truncate_message_tail(stderr, STDERR_BUDGET)
                    )
                }
            }
            ConversionError::StageFailed { stage, source } => {
                format!("{} stage failed: {}", stage, source.operator_message())
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_message_is_verbatim_stderr() {
        let err = ConversionError::ToolFailed {
            exit_code: Some(1),
            stderr: "Unknown node type\n".into(),
        };
        assert_eq!(err.operator_message(), "Unknown node type");
    }

    #[test]
    fn test_long_stderr_keeps_final_error_line() {
        let err = ConversionError::ToolFailed {
            exit_code: Some(1),
            stderr: format!(
                "{}RuntimeError: Unknown node type\n",
                "Warning: deprecated add-on API\n".repeat(200)
            ),
        }
        .in_stage(Stage::Export);
        let message = err.operator_message();
        assert!(message.len() <= MAX_ERROR_LEN);
        assert!(message.starts_with("export stage failed: [truncated]"));
        assert!(message.ends_with("RuntimeError: Unknown node type"));
    }

    #[test]
    fn test_operator_message_without_stderr() {
        let err = ConversionError::ToolFailed {
            exit_code: Some(3),
            stderr: String::new(),
        };
        assert_eq!(err.operator_message(), "Conversion tool exited with exit code 3");
    }

    #[test]
    fn test_stage_is_named_and_not_double_wrapped() {
        let err = ConversionError::OutputEmpty(PathBuf::from("/w/m1.usd"))
            .in_stage(Stage::Export)
            .in_stage(Stage::Package);
        assert!(matches!(err, ConversionError::StageFailed { stage: Stage::Export, .. }));
        assert!(err.operator_message().starts_with("export stage failed"));
    }

    #[test]
    fn test_timeout_message_has_indicator() {
        let err = ConversionError::Timeout {
            limit: Duration::from_secs(600),
            stderr: String::new(),
        }
        .in_stage(Stage::Export);
        assert!(err.is_timeout());
        assert!(err.operator_message().contains("timed out"));
    }
}
