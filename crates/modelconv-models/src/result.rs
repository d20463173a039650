//! Conversion results and the notification wire record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::{IntakeMessage, JobDescriptor, ObjectLocator, JOB_TYPE_CONVERSION};

/// Upper bound on the error text carried by a result.
pub const MAX_ERROR_LEN: usize = 4096;

const TRUNCATION_MARKER: &str = "…[truncated]";

const LEADING_TRUNCATION_MARKER: &str = "[truncated]…";

/// Terminal status of one job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure class, reported alongside the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad intake message
    Validation,
    /// Object store download/upload failed
    Storage,
    /// External tool failed, timed out, or produced no usable output
    Conversion,
    /// Message was redelivered too many times without completing
    Delivery,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Conversion => "conversion",
            ErrorCategory::Delivery => "delivery",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one job attempt. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    job_id: String,
    status: JobStatus,
    output: Option<ObjectLocator>,
    error: Option<String>,
    category: Option<ErrorCategory>,
}

impl ConversionResult {
    pub fn completed(job_id: impl Into<String>, output: ObjectLocator) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            output: Some(output),
            error: None,
            category: None,
        }
    }

    pub fn failed(
        job_id: impl Into<String>,
        error: impl Into<String>,
        category: Option<ErrorCategory>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            output: None,
            error: Some(truncate_message(error.into(), MAX_ERROR_LEN)),
            category,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn output(&self) -> Option<&ObjectLocator> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.category
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Truncate to at most `max` bytes on a char boundary, appending a marker.
pub fn truncate_message(mut message: String, max: usize) -> String {
    if message.len() <= max {
        return message;
    }
    let mut cut = max.saturating_sub(TRUNCATION_MARKER.len());
    while cut > 0 && !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message.truncate(cut);
    message.push_str(TRUNCATION_MARKER);
    message
}

/// Keep the last `max` bytes on a char boundary, prefixing a marker.
///
/// Used for tool output, where the final lines carry the error.
pub fn truncate_message_tail(message: &str, max: usize) -> String {
    if message.len() <= max {
        return message.to_string();
    }
    let mut start = message.len() - max.saturating_sub(LEADING_TRUNCATION_MARKER.len());
    while start < message.len() && !message.is_char_boundary(start) {
        start += 1;
    }
    format!("{}{}", LEADING_TRUNCATION_MARKER, &message[start..])
}

/// Correlation fields echoed back on every notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    pub job_id: String,
    pub model_id: String,
    pub connection_id: Option<String>,
    pub job_type: String,
    pub from_file_type: String,
    pub to_file_type: String,
    pub s3_key: String,
}

impl From<&JobDescriptor> for Correlation {
    fn from(job: &JobDescriptor) -> Self {
        Self {
            job_id: job.job_id().to_string(),
            model_id: job.model_id().to_string(),
            connection_id: job.connection_id().map(str::to_string),
            job_type: job.job_type().to_string(),
            from_file_type: job.from_format().to_string(),
            to_file_type: job.to_format().to_string(),
            s3_key: job.source().key.clone(),
        }
    }
}

impl From<&IntakeMessage> for Correlation {
    /// Best-effort echo of a message that failed validation.
    fn from(msg: &IntakeMessage) -> Self {
        let owned = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or_default().to_string();
        Self {
            job_id: owned(&msg.job_id),
            model_id: owned(&msg.model_id),
            connection_id: msg.opaque_connection_id(),
            job_type: msg
                .job_type
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(JOB_TYPE_CONVERSION)
                .to_string(),
            from_file_type: owned(&msg.from_file_type),
            to_file_type: owned(&msg.to_file_type),
            s3_key: owned(&msg.s3_key),
        }
    }
}

/// Job outcome record sent to the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub job_id: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub job_type: String,
    pub job_status: JobStatus,
    pub from_file_type: String,
    pub to_file_type: String,
    pub s3_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_s3_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    pub timestamp: String,
}

impl Notification {
    pub fn new(correlation: &Correlation, result: &ConversionResult) -> Self {
        Self::at(correlation, result, Utc::now())
    }

    pub fn at(correlation: &Correlation, result: &ConversionResult, now: DateTime<Utc>) -> Self {
        Self {
            job_id: correlation.job_id.clone(),
            model_id: correlation.model_id.clone(),
            connection_id: correlation.connection_id.clone(),
            job_type: correlation.job_type.clone(),
            job_status: result.status(),
            from_file_type: correlation.from_file_type.clone(),
            to_file_type: correlation.to_file_type.clone(),
            s3_key: correlation.s3_key.clone(),
            new_s3_key: result.output().map(|o| o.key.clone()),
            error: result.error().map(str::to_string),
            error_category: result.category(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn job() -> JobDescriptor {
        JobDescriptor::parse(
            r#"{"jobId":"j1","modelId":"m1","fromFileType":"blend","toFileType":"glb","s3Key":"in/m1.blend","connectionId":"c1"}"#,
            "models",
        )
        .unwrap()
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_completed_notification_wire_shape() {
        let job = job();
        let result = ConversionResult::completed("j1", ObjectLocator::new("models", "glb/m1.glb"));
        let n = Notification::at(&Correlation::from(&job), &result, fixed_time());

        let value: serde_json::Value = serde_json::from_str(&n.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "jobId": "j1",
                "modelId": "m1",
                "connectionId": "c1",
                "jobType": "conversion",
                "jobStatus": "completed",
                "fromFileType": "blend",
                "toFileType": "glb",
                "s3Key": "in/m1.blend",
                "newS3Key": "glb/m1.glb",
                "timestamp": "2025-03-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn test_failed_notification_echoes_correlation() {
        let job = job();
        let result = ConversionResult::failed("j1", "Unknown node type", Some(ErrorCategory::Conversion));
        let n = Notification::at(&Correlation::from(&job), &result, fixed_time());

        assert_eq!(n.job_status, JobStatus::Failed);
        assert_eq!(n.error.as_deref(), Some("Unknown node type"));
        assert_eq!(n.error_category, Some(ErrorCategory::Conversion));
        assert_eq!(n.new_s3_key, None);
        assert_eq!(n.connection_id.as_deref(), Some("c1"));
        assert_eq!(n.to_file_type, "glb");
    }

    #[test]
    fn test_correlation_from_invalid_intake() {
        let msg = IntakeMessage::from_body(r#"{"jobId":"j9","toFileType":"vox"}"#).unwrap();
        let c = Correlation::from(&msg);
        assert_eq!(c.job_id, "j9");
        assert_eq!(c.to_file_type, "vox");
        assert_eq!(c.model_id, "");
        assert_eq!(c.job_type, JOB_TYPE_CONVERSION);
        assert_eq!(c.connection_id, None);
    }

    #[test]
    fn test_invalid_intake_echoes_raw_connection_id() {
        let msg = IntakeMessage::from_body(r#"{"jobId":"j9","connectionId":"  c1 "}"#).unwrap();
        assert_eq!(Correlation::from(&msg).connection_id.as_deref(), Some("  c1 "));
    }

    #[test]
    fn test_error_text_is_bounded() {
        let long = "é".repeat(MAX_ERROR_LEN);
        let result = ConversionResult::failed("j1", long, None);
        let error = result.error().unwrap();
        assert!(error.len() <= MAX_ERROR_LEN);
        assert!(error.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_tail_truncation_keeps_final_line() {
        let stderr = format!(
            "{}RuntimeError: Unknown node type",
            "Warning: deprecated add-on API\n".repeat(200)
        );
        let kept = truncate_message_tail(&stderr, MAX_ERROR_LEN);
        assert!(kept.len() <= MAX_ERROR_LEN);
        assert!(kept.starts_with(LEADING_TRUNCATION_MARKER));
        assert!(kept.ends_with("RuntimeError: Unknown node type"));

        let multibyte = truncate_message_tail(&"é".repeat(100), 21);
        assert!(multibyte.len() <= 21);
        assert!(multibyte.ends_with('é'));
        assert_eq!(truncate_message_tail("boom", 10), "boom");
    }

    #[test]
    fn test_short_error_untouched() {
        assert_eq!(truncate_message("boom".into(), 10), "boom");
    }
}
