//! Outcome notifications.

use std::sync::Arc;
use std::time::Duration;

use modelconv_models::{ConversionResult, Correlation, Notification};
use modelconv_queue::NotificationChannel;
use tracing::{debug, error};

use crate::metrics;
use crate::retry::{retry_async, RetryConfig};

/// Sends one outcome record per job.
///
/// Delivery failures are logged and counted; they never propagate into the
/// job, whose status is already decided.
pub struct Notifier {
    channel: Arc<dyn NotificationChannel>,
    retry: RetryConfig,
}

impl Notifier {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            channel,
            retry: RetryConfig::new("notification")
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(200))
                .with_max_delay(Duration::from_secs(2)),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Send the notification for `result`. Returns whether it was delivered.
    pub async fn notify(&self, correlation: &Correlation, result: &ConversionResult) -> bool {
        let body = match Notification::new(correlation, result).to_json() {
            Ok(body) => body,
            Err(e) => {
                error!(job_id = %correlation.job_id, "Failed to serialize notification: {}", e);
                metrics::record_notification_failed();
                return false;
            }
        };

        match retry_async(&self.retry, |_| true, || self.channel.send(&body)).await {
            Ok(message_id) => {
                debug!(
                    job_id = %correlation.job_id,
                    "Sent {} notification {}", result.status(), message_id
                );
                true
            }
            Err(e) => {
                error!(job_id = %correlation.job_id, "Failed to send notification: {}", e);
                metrics::record_notification_failed();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelconv_models::{ErrorCategory, ObjectLocator};
    use modelconv_queue::{MockNotificationChannel, QueueError};

    fn correlation() -> Correlation {
        Correlation {
            job_id: "j1".into(),
            model_id: "m1".into(),
            connection_id: Some("c1".into()),
            job_type: "conversion".into(),
            from_file_type: "blend".into(),
            to_file_type: "glb".into(),
            s3_key: "in/m1.blend".into(),
        }
    }

    fn fast(notifier: Notifier) -> Notifier {
        notifier.with_retry(
            RetryConfig::new("notification")
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_sends_record_with_correlation() {
        let mut channel = MockNotificationChannel::new();
        channel
            .expect_send()
            .withf(|body| {
                let value: serde_json::Value = serde_json::from_str(body).unwrap();
                value["jobId"] == "j1"
                    && value["connectionId"] == "c1"
                    && value["jobStatus"] == "completed"
                    && value["newS3Key"] == "glb/m1.glb"
            })
            .times(1)
            .returning(|_| Ok("1-0".to_string()));

        let notifier = Notifier::new(Arc::new(channel));
        let result = ConversionResult::completed("j1", ObjectLocator::new("models", "glb/m1.glb"));
        assert!(notifier.notify(&correlation(), &result).await);
    }

    #[tokio::test]
    async fn test_retries_then_gives_up_without_error() {
        let mut channel = MockNotificationChannel::new();
        channel
            .expect_send()
            .times(3)
            .returning(|_| Err(QueueError::send_failed("connection reset")));

        let notifier = fast(Notifier::new(Arc::new(channel)));
        let result = ConversionResult::failed("j1", "boom", Some(ErrorCategory::Conversion));
        assert!(!notifier.notify(&correlation(), &result).await);
    }
}
