//! Intake messages and validated job descriptors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::{ValidationError, ValidationResult};
use crate::format::FileFormat;

/// The only job type this worker executes.
pub const JOB_TYPE_CONVERSION: &str = "conversion";

/// Required intake fields, in wire order.
const REQUIRED_FIELDS: [&str; 5] = ["jobId", "modelId", "fromFileType", "toFileType", "s3Key"];

/// Location of an object in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocator {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Raw intake message, decoded leniently.
///
/// Every field is optional so that correlation data can still be echoed on a
/// failure notification when validation rejects the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeMessage {
    pub job_id: Option<String>,
    pub model_id: Option<String>,
    pub from_file_type: Option<String>,
    pub to_file_type: Option<String>,
    pub s3_key: Option<String>,
    pub connection_id: Option<String>,
    pub job_type: Option<String>,
    /// Fields present with a non-string JSON value.
    wrong_type: Vec<&'static str>,
}

impl IntakeMessage {
    /// Decode a raw queue message body.
    ///
    /// Fails only if the body is not a JSON object.
    pub fn from_body(body: &str) -> ValidationResult<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| ValidationError::malformed(format!("invalid JSON: {}", e)))?;
        let Value::Object(map) = value else {
            return Err(ValidationError::malformed("expected a JSON object"));
        };

        let mut msg = IntakeMessage::default();
        msg.job_id = msg.take_string(&map, "jobId");
        msg.model_id = msg.take_string(&map, "modelId");
        msg.from_file_type = msg.take_string(&map, "fromFileType");
        msg.to_file_type = msg.take_string(&map, "toFileType");
        msg.s3_key = msg.take_string(&map, "s3Key");
        msg.connection_id = msg.take_string(&map, "connectionId");
        msg.job_type = msg.take_string(&map, "jobType");
        Ok(msg)
    }

    fn take_string(&mut self, map: &Map<String, Value>, field: &'static str) -> Option<String> {
        match map.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.wrong_type.push(field);
                None
            }
        }
    }

    /// The caller's connection token, echoed verbatim when non-empty.
    pub fn opaque_connection_id(&self) -> Option<String> {
        self.connection_id.clone().filter(|s| !s.is_empty())
    }

    fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "jobId" => &self.job_id,
            "modelId" => &self.model_id,
            "fromFileType" => &self.from_file_type,
            "toFileType" => &self.to_file_type,
            "s3Key" => &self.s3_key,
            _ => return None,
        };
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Validate into an immutable [`JobDescriptor`].
    ///
    /// No I/O happens here; `source_bucket` comes from worker configuration.
    pub fn validate(&self, source_bucket: &str) -> ValidationResult<JobDescriptor> {
        if let Some(field) = self.wrong_type.first().copied() {
            return Err(ValidationError::invalid_field(field, "expected a string"));
        }

        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|name| self.field(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        // Presence was checked above.
        let job_id = self.field("jobId").unwrap_or_default().to_string();
        let model_id = self.field("modelId").unwrap_or_default().to_string();
        let from_raw = self.field("fromFileType").unwrap_or_default();
        let to_raw = self.field("toFileType").unwrap_or_default();
        let s3_key = self.field("s3Key").unwrap_or_default().to_string();

        let job_type = match self.job_type.as_deref().map(str::trim) {
            None | Some("") => JOB_TYPE_CONVERSION.to_string(),
            Some(t) if t == JOB_TYPE_CONVERSION => t.to_string(),
            Some(other) => return Err(ValidationError::UnsupportedJobType(other.to_string())),
        };

        let from = from_raw
            .parse::<FileFormat>()
            .map_err(|_| ValidationError::UnsupportedFormat {
                field: "fromFileType",
                value: from_raw.to_string(),
            })?;
        let to = to_raw
            .parse::<FileFormat>()
            .map_err(|_| ValidationError::UnsupportedFormat {
                field: "toFileType",
                value: to_raw.to_string(),
            })?;
        if !from.can_convert_to(to) {
            return Err(ValidationError::UnsupportedPair {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        validate_file_stem(&model_id)?;

        if source_bucket.trim().is_empty() {
            return Err(ValidationError::invalid_field("s3Key", "source bucket is not configured"));
        }

        let connection_id = self.opaque_connection_id();

        Ok(JobDescriptor {
            job_id,
            model_id,
            from,
            to,
            source: ObjectLocator::new(source_bucket, s3_key),
            connection_id,
            job_type,
        })
    }
}

/// `modelId` names local files, so it must be a single safe path component.
fn validate_file_stem(model_id: &str) -> ValidationResult<()> {
    if model_id == "." || model_id == ".." {
        return Err(ValidationError::invalid_field("modelId", "must not be a relative path"));
    }
    if model_id.chars().any(|c| c == '/' || c == '\\' || c == '\0') {
        return Err(ValidationError::invalid_field(
            "modelId",
            "must not contain path separators",
        ));
    }
    Ok(())
}

/// A validated conversion request. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    job_id: String,
    model_id: String,
    from: FileFormat,
    to: FileFormat,
    source: ObjectLocator,
    connection_id: Option<String>,
    job_type: String,
}

impl JobDescriptor {
    /// Parse and validate a raw message body.
    pub fn parse(body: &str, source_bucket: &str) -> ValidationResult<Self> {
        IntakeMessage::from_body(body)?.validate(source_bucket)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn from_format(&self) -> FileFormat {
        self.from
    }

    pub fn to_format(&self) -> FileFormat {
        self.to
    }

    pub fn source(&self) -> &ObjectLocator {
        &self.source
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Local file name of the downloaded input.
    pub fn input_file_name(&self) -> String {
        format!("{}.{}", self.model_id, self.from.extension())
    }

    /// Local file name of the converted output.
    pub fn output_file_name(&self) -> String {
        format!("{}.{}", self.model_id, self.to.extension())
    }

    /// Where the converted file is uploaded.
    pub fn output_locator(&self, strategy: OutputKeyStrategy, bucket: &str) -> ObjectLocator {
        ObjectLocator::new(bucket, strategy.output_key(self))
    }
}

/// Naming convention for converted objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKeyStrategy {
    /// `<toFileType>/<modelId>.<toFileType>`
    #[default]
    ByFormat,
    /// `converted/<modelId>.<toFileType>`
    Converted,
}

impl OutputKeyStrategy {
    pub fn output_key(&self, job: &JobDescriptor) -> String {
        match self {
            OutputKeyStrategy::ByFormat => {
                format!("{}/{}", job.to_format().as_str(), job.output_file_name())
            }
            OutputKeyStrategy::Converted => format!("converted/{}", job.output_file_name()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKeyStrategy::ByFormat => "by-format",
            OutputKeyStrategy::Converted => "converted",
        }
    }
}

impl fmt::Display for OutputKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputKeyStrategy {
    type Err = OutputKeyStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "by-format" | "by_format" => Ok(OutputKeyStrategy::ByFormat),
            "converted" => Ok(OutputKeyStrategy::Converted),
            _ => Err(OutputKeyStrategyParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown output key strategy: {0}")]
pub struct OutputKeyStrategyParseError(String);
