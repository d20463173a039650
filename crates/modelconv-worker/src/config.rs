//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use modelconv_blender::BlenderConfig;
use modelconv_models::OutputKeyStrategy;
use modelconv_queue::QueueConfig;

use crate::error::{WorkerError, WorkerResult};

/// Variables that must be set for the worker to start.
pub const REQUIRED_VARS: [&str; 3] = ["MODEL_S3_BUCKET", "INTAKE_STREAM", "NOTIFICATION_STREAM"];

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bucket holding the source models
    pub source_bucket: String,
    /// Bucket receiving converted models (defaults to the source bucket)
    pub output_bucket: String,
    /// Naming convention for converted objects
    pub output_key_strategy: OutputKeyStrategy,
    /// Redis URL for the intake and notification streams
    pub redis_url: String,
    /// Intake stream name
    pub intake_stream: String,
    /// Notification stream name
    pub notification_stream: String,
    /// Consumer group override
    pub consumer_group: Option<String>,
    /// Dead letter stream override
    pub dlq_stream: Option<String>,
    /// Blender executable
    pub blender_bin: String,
    /// Conversion script passed to Blender
    pub blender_script: PathBuf,
    /// Extra arguments placed before the Blender flags
    pub blender_extra_args: Vec<String>,
    /// Wall-clock limit for one Blender invocation
    pub conversion_timeout: Duration,
    /// Retries for transient storage failures
    pub storage_max_retries: u32,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Parent directory for job workspaces
    pub work_dir: PathBuf,
    /// Maximum time a receive call blocks
    pub poll_wait: Duration,
    /// Idle time after which an undeleted message is redelivered
    pub visibility_timeout: Duration,
    /// Deliveries after which a message is dead-lettered
    pub max_deliveries: u32,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus listener port
    pub metrics_port: Option<u16>,
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &str| {
            get(name).ok_or_else(|| {
                WorkerError::config_error(format!("missing required env var {}", name))
            })
        };
        let number = |name: &str, default: u64| -> WorkerResult<u64> {
            match get(name) {
                Some(raw) => raw.parse().map_err(|_| {
                    WorkerError::config_error(format!("{} is not a number: {}", name, raw))
                }),
                None => Ok(default),
            }
        };
        let positive = |name: &str, default: u64| -> WorkerResult<u64> {
            match number(name, default)? {
                0 => Err(WorkerError::config_error(format!("{} must be greater than zero", name))),
                n => Ok(n),
            }
        };
        let count = |value: u64, name: &str| -> WorkerResult<u32> {
            u32::try_from(value)
                .map_err(|_| WorkerError::config_error(format!("{} is out of range: {}", name, value)))
        };

        let source_bucket = required("MODEL_S3_BUCKET")?;
        let intake_stream = required("INTAKE_STREAM")?;
        let notification_stream = required("NOTIFICATION_STREAM")?;

        let output_key_strategy = match get("OUTPUT_KEY_STRATEGY") {
            Some(raw) => raw
                .parse()
                .map_err(|e| WorkerError::config_error(format!("OUTPUT_KEY_STRATEGY: {}", e)))?,
            None => OutputKeyStrategy::default(),
        };

        let metrics_port = match get("METRICS_PORT") {
            Some(raw) => Some(raw.parse().map_err(|_| {
                WorkerError::config_error(format!("METRICS_PORT is not a port number: {}", raw))
            })?),
            None => None,
        };

        Ok(Self {
            output_bucket: get("OUTPUT_BUCKET").unwrap_or_else(|| source_bucket.clone()),
            source_bucket,
            output_key_strategy,
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            intake_stream,
            notification_stream,
            consumer_group: get("QUEUE_CONSUMER_GROUP"),
            dlq_stream: get("QUEUE_DLQ_STREAM"),
            blender_bin: get("BLENDER_BIN").unwrap_or_else(|| "blender".to_string()),
            blender_script: get("BLENDER_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("scripts/blender_convert.py")),
            blender_extra_args: get("BLENDER_EXTRA_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            conversion_timeout: Duration::from_secs(positive("CONVERSION_TIMEOUT_SECS", 600)?),
            storage_max_retries: count(number("STORAGE_MAX_RETRIES", 3)?, "STORAGE_MAX_RETRIES")?,
            max_concurrent_jobs: count(positive("WORKER_MAX_JOBS", 1)?, "WORKER_MAX_JOBS")? as usize,
            work_dir: get("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("modelconv")),
            // BLOCK 0 would wait forever and never observe shutdown.
            poll_wait: Duration::from_millis(positive("WORKER_POLL_WAIT_MS", 5000)?),
            visibility_timeout: Duration::from_secs(positive("QUEUE_VISIBILITY_TIMEOUT_SECS", 900)?),
            max_deliveries: count(positive("QUEUE_MAX_DELIVERIES", 3)?, "QUEUE_MAX_DELIVERIES")?,
            shutdown_timeout: Duration::from_secs(number("WORKER_SHUTDOWN_TIMEOUT_SECS", 30)?),
            metrics_port,
        })
    }

    /// Intake queue settings.
    pub fn queue_config(&self) -> QueueConfig {
        let mut config = QueueConfig::new(&self.redis_url, &self.intake_stream);
        if let Some(group) = &self.consumer_group {
            config = config.with_consumer_group(group);
        }
        if let Some(dlq) = &self.dlq_stream {
            config = config.with_dlq_stream(dlq);
        }
        config
    }

    /// Blender invocation settings.
    pub fn blender_config(&self) -> BlenderConfig {
        BlenderConfig::new(&self.blender_bin, &self.blender_script)
            .with_launcher_args(self.blender_extra_args.clone())
            .with_timeout(self.conversion_timeout)
    }
}
