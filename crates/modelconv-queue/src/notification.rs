//! Notification channel on Redis Streams.

use async_trait::async_trait;
use tracing::debug;

use crate::channel::NotificationChannel;
use crate::error::{QueueError, QueueResult};

/// Appends notification records to a Redis stream.
pub struct NotificationStream {
    client: redis::Client,
    stream: String,
    max_len: Option<usize>,
}

impl NotificationStream {
    pub fn new(redis_url: &str, stream: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            stream: stream.into(),
            max_len: None,
        })
    }

    /// Approximately cap the stream length (`XADD MAXLEN ~`).
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl NotificationChannel for NotificationStream {
    async fn send(&self, body: &str) -> QueueResult<String> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*").arg("body").arg(body);

        let message_id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::send_failed(e.to_string()))?;

        debug!("Sent notification {} to {}", message_id, self.stream);
        Ok(message_id)
    }
}
