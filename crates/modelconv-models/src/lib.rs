//! Shared data models for the model conversion pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Intake messages and validated job descriptors
//! - File formats and the conversion compatibility table
//! - Output key naming strategies
//! - Conversion results and the notification wire record

pub mod error;
pub mod format;
pub mod job;
pub mod result;

pub use error::{ValidationError, ValidationResult};
pub use format::{FileFormat, FormatParseError};
pub use job::{
    IntakeMessage, JobDescriptor, ObjectLocator, OutputKeyStrategy, OutputKeyStrategyParseError,
    JOB_TYPE_CONVERSION,
};
pub use result::{
    truncate_message, truncate_message_tail, ConversionResult, Correlation, ErrorCategory, JobStatus, Notification,
    MAX_ERROR_LEN,
};
