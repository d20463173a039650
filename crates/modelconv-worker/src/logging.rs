//! Structured job logging utilities.

use tracing::{debug, error, info, warn, Span};

use crate::state::JobState;

/// Operation name used for conversion jobs.
pub const OPERATION_CONVERSION: &str = "model_conversion";

/// Job logger for structured logging with consistent formatting.
///
/// Every event carries the job ID and operation so a single job can be
/// followed through the JSON logs.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &str, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a job.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log a state machine transition.
    pub fn log_transition(&self, from: JobState, to: JobState) {
        debug!(
            job_id = %self.job_id,
            operation = %self.operation,
            from = %from,
            to = %to,
            "Job state changed"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let logger = JobLogger::new("j1", OPERATION_CONVERSION);
        assert_eq!(logger.job_id(), "j1");
        assert_eq!(logger.operation(), "model_conversion");
    }
}
