//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use modelconv_models::{ErrorCategory, FileFormat};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_RECEIVED_TOTAL: &str = "modelconv_jobs_received_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "modelconv_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "modelconv_jobs_failed_total";
    pub const JOBS_IN_FLIGHT: &str = "modelconv_jobs_in_flight";
    pub const JOB_DURATION_SECONDS: &str = "modelconv_job_duration_seconds";

    // Processing metrics
    pub const CONVERSION_DURATION_SECONDS: &str = "modelconv_conversion_duration_seconds";
    pub const RETRIES_TOTAL: &str = "modelconv_retries_total";

    // Delivery metrics
    pub const NOTIFICATIONS_FAILED_TOTAL: &str = "modelconv_notifications_failed_total";
    pub const ACK_FAILED_TOTAL: &str = "modelconv_ack_failed_total";
    pub const MESSAGES_DEAD_LETTERED_TOTAL: &str = "modelconv_messages_dead_lettered_total";
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("failed to start metrics listener: {}", e)))
}

pub fn record_job_received() {
    counter!(names::JOBS_RECEIVED_TOTAL).increment(1);
}

pub fn record_job_completed(target: FileFormat, duration: Duration) {
    let labels = [("target", target.as_str().to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration.as_secs_f64());
}

pub fn record_job_failed(category: ErrorCategory) {
    let labels = [("category", category.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_conversion_duration(target: FileFormat, duration: Duration) {
    let labels = [("target", target.as_str().to_string())];
    histogram!(names::CONVERSION_DURATION_SECONDS, &labels).record(duration.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!(names::RETRIES_TOTAL, &labels).increment(1);
}

pub fn record_notification_failed() {
    counter!(names::NOTIFICATIONS_FAILED_TOTAL).increment(1);
}

pub fn record_ack_failed() {
    counter!(names::ACK_FAILED_TOTAL).increment(1);
}

pub fn record_dead_lettered() {
    counter!(names::MESSAGES_DEAD_LETTERED_TOTAL).increment(1);
}
