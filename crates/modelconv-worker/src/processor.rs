//! Single-job processing.
//!
//! One delivery goes through validate → download → convert → upload →
//! notify → delete. Every failure is caught here and turned into exactly one
//! failure notification, after which the message is deleted as well; only a
//! crash leaves a message for redelivery.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use modelconv_blender::Converter;
use modelconv_models::{
    ConversionResult, Correlation, ErrorCategory, IntakeMessage, JobDescriptor, ObjectLocator,
    OutputKeyStrategy,
};
use modelconv_queue::{Delivery, IntakeChannel};
use modelconv_storage::{ObjectStore, StorageError};
use tracing::{error, warn, Instrument};

use crate::config::WorkerConfig;
use crate::error::JobFailure;
use crate::logging::{JobLogger, OPERATION_CONVERSION};
use crate::metrics;
use crate::notifier::Notifier;
use crate::retry::{retry_async, RetryConfig};
use crate::state::{JobProgress, JobState};
use crate::workspace::JobWorkspace;

/// Settings the processor needs from the worker configuration.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub source_bucket: String,
    pub output_bucket: String,
    pub key_strategy: OutputKeyStrategy,
    /// Parent directory for job workspaces
    pub work_dir: PathBuf,
    /// Retry policy for transient storage failures
    pub storage_retry: RetryConfig,
}

impl ProcessorSettings {
    pub fn new(source_bucket: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        let source_bucket = source_bucket.into();
        Self {
            output_bucket: source_bucket.clone(),
            source_bucket,
            key_strategy: OutputKeyStrategy::default(),
            work_dir: work_dir.into(),
            storage_retry: RetryConfig::new("storage"),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            source_bucket: config.source_bucket.clone(),
            output_bucket: config.output_bucket.clone(),
            key_strategy: config.output_key_strategy,
            work_dir: config.work_dir.clone(),
            storage_retry: RetryConfig::new("storage").with_max_retries(config.storage_max_retries),
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: String,
    pub final_state: JobState,
    pub result: ConversionResult,
    /// The notification was delivered to the channel
    pub notified: bool,
    /// The message was deleted from the intake channel
    pub acknowledged: bool,
}

/// Runs jobs against injected storage, converter and channels.
pub struct JobProcessor {
    intake: Arc<dyn IntakeChannel>,
    store: Arc<dyn ObjectStore>,
    converter: Arc<dyn Converter>,
    notifier: Notifier,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        intake: Arc<dyn IntakeChannel>,
        store: Arc<dyn ObjectStore>,
        converter: Arc<dyn Converter>,
        notifier: Notifier,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            intake,
            store,
            converter,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Process one delivery to a terminal state.
    pub async fn handle(&self, delivery: &Delivery) -> JobReport {
        let started = Instant::now();
        metrics::record_job_received();

        // Validation happens before any storage or subprocess call.
        let (correlation, target, mut progress, outcome) =
            match JobDescriptor::parse(&delivery.body, &self.settings.source_bucket) {
                Ok(job) => {
                    let logger = JobLogger::new(job.job_id(), OPERATION_CONVERSION);
                    let span = logger.create_span();
                    logger.log_start(&format!(
                        "{} -> {} ({})",
                        job.from_format(),
                        job.to_format(),
                        job.source()
                    ));
                    let mut progress = JobProgress::new(logger);
                    let outcome = self.run(&job, &mut progress).instrument(span).await;
                    (Correlation::from(&job), Some(job.to_format()), progress, outcome)
                }
                Err(e) => {
                    let correlation = IntakeMessage::from_body(&delivery.body)
                        .map(|msg| Correlation::from(&msg))
                        .unwrap_or_default();
                    let logger = JobLogger::new(&correlation.job_id, OPERATION_CONVERSION);
                    (correlation, None, JobProgress::new(logger), Err(JobFailure::from(e)))
                }
            };

        let result = match outcome {
            Ok(output) => {
                if let Some(target) = target {
                    metrics::record_job_completed(target, started.elapsed());
                }
                progress.logger().log_completion(&format!(
                    "uploaded {} in {:.1}s",
                    output,
                    started.elapsed().as_secs_f64()
                ));
                ConversionResult::completed(&correlation.job_id, output)
            }
            Err(failure) => {
                progress.logger().log_error(&failure.to_string());
                progress.fail();
                metrics::record_job_failed(failure.category());
                ConversionResult::failed(
                    &correlation.job_id,
                    failure.operator_message(),
                    Some(failure.category()),
                )
            }
        };

        self.finish(delivery, &correlation, result, progress).await
    }

    /// Dead-letter a message that keeps coming back without completing.
    ///
    /// The job is reported failed once, then the raw message moves to the
    /// dead-letter channel.
    pub async fn dead_letter(&self, delivery: &Delivery, max_deliveries: u32) -> JobReport {
        let correlation = IntakeMessage::from_body(&delivery.body)
            .map(|msg| Correlation::from(&msg))
            .unwrap_or_default();
        let logger = JobLogger::new(&correlation.job_id, OPERATION_CONVERSION);
        let reason = format!(
            "Message {} delivered {} times without completing (limit {})",
            delivery.id, delivery.delivery_count, max_deliveries
        );
        logger.log_error(&reason);

        let mut progress = JobProgress::new(logger);
        progress.fail();
        metrics::record_job_failed(ErrorCategory::Delivery);

        let result = ConversionResult::failed(
            &correlation.job_id,
            reason.as_str(),
            Some(ErrorCategory::Delivery),
        );
        let notified = self.notifier.notify(&correlation, &result).await;

        let acknowledged = match self.intake.dead_letter(delivery, &reason).await {
            Ok(()) => {
                metrics::record_dead_lettered();
                true
            }
            Err(e) => {
                error!(message_id = %delivery.id, "Failed to dead-letter message: {}", e);
                metrics::record_ack_failed();
                false
            }
        };

        JobReport {
            job_id: correlation.job_id,
            final_state: progress.state(),
            result,
            notified,
            acknowledged,
        }
    }

    /// Run the job steps in order. The workspace is removed on every path.
    async fn run(
        &self,
        job: &JobDescriptor,
        progress: &mut JobProgress,
    ) -> Result<ObjectLocator, JobFailure> {
        progress.advance(JobState::Validated);

        let workspace =
            JobWorkspace::create(&self.settings.work_dir, job).map_err(JobFailure::Workspace)?;
        let paths = workspace.paths();

        let source = job.source();
        self.with_storage_retry("download", || self.store.download(source, &paths.input))
            .await
            .map_err(|error| JobFailure::Download {
                locator: source.clone(),
                error,
            })?;
        progress.advance(JobState::Downloaded);

        let convert_started = Instant::now();
        let produced = self.converter.convert(job, paths).await?;
        metrics::record_conversion_duration(job.to_format(), convert_started.elapsed());
        progress.advance(JobState::Converted);

        let output = job.output_locator(self.settings.key_strategy, &self.settings.output_bucket);
        let content_type = job.to_format().content_type();
        self.with_storage_retry("upload", || self.store.upload(&produced, &output, content_type))
            .await
            .map_err(|error| JobFailure::Upload {
                locator: output.clone(),
                error,
            })?;
        progress.advance(JobState::Uploaded);

        if let Err(e) = workspace.close() {
            progress
                .logger()
                .log_warning(&format!("failed to remove workspace: {}", e));
        }
        Ok(output)
    }

    /// Notify, then delete the message. The notification is always attempted
    /// first; delete never happens before it.
    async fn finish(
        &self,
        delivery: &Delivery,
        correlation: &Correlation,
        result: ConversionResult,
        mut progress: JobProgress,
    ) -> JobReport {
        let notified = self.notifier.notify(correlation, &result).await;
        if result.is_success() {
            progress.advance(JobState::Notified);
        }

        let acknowledged = match self.intake.delete(&delivery.id).await {
            Ok(()) => {
                if result.is_success() {
                    progress.advance(JobState::Acknowledged);
                }
                true
            }
            Err(e) => {
                // The message will be redelivered after the visibility timeout.
                warn!(
                    job_id = %correlation.job_id,
                    message_id = %delivery.id,
                    "Failed to delete message: {}", e
                );
                metrics::record_ack_failed();
                false
            }
        };

        JobReport {
            job_id: correlation.job_id.clone(),
            final_state: progress.state(),
            result,
            notified,
            acknowledged,
        }
    }

    async fn with_storage_retry<F, Fut>(&self, operation: &str, call: F) -> Result<(), StorageError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), StorageError>>,
    {
        let config = self.settings.storage_retry.named(operation);
        retry_async(&config, StorageError::is_retryable, call).await
    }
}
