//! Intake channel on Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::channel::{Delivery, IntakeChannel};
use crate::error::{QueueError, QueueResult};

/// Stream entry fields that may carry the job body.
const BODY_FIELDS: [&str; 2] = ["job", "body"];

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for intake jobs
    pub intake_stream: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream: String,
}

impl QueueConfig {
    pub fn new(redis_url: impl Into<String>, intake_stream: impl Into<String>) -> Self {
        let intake_stream = intake_stream.into();
        Self {
            redis_url: redis_url.into(),
            consumer_group: "modelconv:workers".to_string(),
            dlq_stream: format!("{}:dlq", intake_stream),
            intake_stream,
        }
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_dlq_stream(mut self, stream: impl Into<String>) -> Self {
        self.dlq_stream = stream.into();
        self
    }
}

/// Job queue client for one consumer.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
}

impl JobQueue {
    /// Create a new job queue consumer.
    pub fn new(config: QueueConfig, consumer_name: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            consumer_name: consumer_name.into(),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.intake_stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Append a raw job body to the intake stream.
    pub async fn enqueue(&self, body: &str) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.intake_stream)
            .arg("*")
            .arg("job")
            .arg(body)
            .query_async(&mut conn)
            .await?;
        debug!("Enqueued message {}", message_id);
        Ok(message_id)
    }

    /// Get intake stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.intake_stream).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream).await?;
        Ok(len)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl IntakeChannel for JobQueue {
    async fn receive(&self, max_messages: usize, wait: Duration) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        // BLOCK timeouts reply with nil.
        let result: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(max_messages.max(1))
            .arg("BLOCK")
            .arg(wait.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.intake_stream)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::ReceiveFailed(e.to_string()))?;

        let deliveries: Vec<Delivery> = result
            .unwrap_or_default()
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| delivery_from_entry(entry, 1))
            .collect();

        if !deliveries.is_empty() {
            debug!("Received {} messages from {}", deliveries.len(), self.config.intake_stream);
        }
        Ok(deliveries)
    }

    async fn reclaim_stale(
        &self,
        min_idle: Duration,
        max_messages: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.intake_stream)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max_messages.max(1))
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.intake_stream)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            claim.arg(&entry.id);
        }
        let claimed: StreamClaimReply = claim.query_async(&mut conn).await?;

        let deliveries: Vec<Delivery> = claimed
            .ids
            .into_iter()
            .map(|entry| {
                // XCLAIM increments the delivery counter reported by XPENDING.
                let previous = pending
                    .ids
                    .iter()
                    .find(|p| p.id == entry.id)
                    .map(|p| p.times_delivered as u32)
                    .unwrap_or(1);
                delivery_from_entry(entry, previous.saturating_add(1))
            })
            .collect();

        for delivery in &deliveries {
            info!(
                "Reclaimed stale message {} (delivery {})",
                delivery.id, delivery.delivery_count
            );
        }
        Ok(deliveries)
    }

    async fn touch(&self, delivery_ids: &[String]) -> QueueResult<()> {
        if delivery_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        // JUSTID claims leave the delivery counter untouched.
        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.intake_stream)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(0);
        for id in delivery_ids {
            claim.arg(id);
        }
        claim.arg("JUSTID");
        let refreshed: Vec<String> = claim.query_async(&mut conn).await?;

        if refreshed.len() < delivery_ids.len() {
            warn!(
                "Refreshed {} of {} in-flight messages",
                refreshed.len(),
                delivery_ids.len()
            );
        }
        Ok(())
    }

    async fn delete(&self, delivery_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.intake_stream)
            .arg(&self.config.consumer_group)
            .arg(delivery_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::DeleteFailed(e.to_string()))?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.intake_stream)
            .arg(delivery_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::DeleteFailed(e.to_string()))?;

        debug!("Deleted message {}", delivery_id);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("*")
            .arg("job")
            .arg(&delivery.body)
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(&delivery.id)
            .arg("delivery_count")
            .arg(delivery.delivery_count)
            .query_async::<()>(&mut conn)
            .await?;

        self.delete(&delivery.id).await?;

        warn!("Moved message {} to DLQ: {}", delivery.id, reason);
        Ok(())
    }
}

/// Build a delivery from a stream entry.
///
/// Entries without a readable body field are still delivered (with an empty
/// body) so the worker reports them instead of dropping them silently.
fn delivery_from_entry(entry: StreamId, delivery_count: u32) -> Delivery {
    let body = BODY_FIELDS
        .iter()
        .find_map(|field| entry.map.get(*field).and_then(value_to_string))
        .unwrap_or_else(|| {
            warn!("Stream entry {} has no job body", entry.id);
            String::new()
        });

    Delivery::new(entry.id, body).with_delivery_count(delivery_count)
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, redis::Value)]) -> StreamId {
        StreamId {
            id: "1700000000000-0".to_string(),
            map: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_delivery_reads_job_field() {
        let d = delivery_from_entry(
            entry(&[("job", redis::Value::BulkString(b"{\"jobId\":\"j1\"}".to_vec()))]),
            1,
        );
        assert_eq!(d.id, "1700000000000-0");
        assert_eq!(d.body, "{\"jobId\":\"j1\"}");
        assert_eq!(d.delivery_count, 1);
    }

    #[test]
    fn test_delivery_falls_back_to_body_field() {
        let d = delivery_from_entry(
            entry(&[("body", redis::Value::SimpleString("{}".to_string()))]),
            3,
        );
        assert_eq!(d.body, "{}");
        assert_eq!(d.delivery_count, 3);
    }

    #[test]
    fn test_entry_without_body_is_still_delivered() {
        let d = delivery_from_entry(entry(&[("other", redis::Value::Int(1))]), 1);
        assert_eq!(d.body, "");
    }

    #[test]
    fn test_config_defaults_derive_from_stream() {
        let config = QueueConfig::new("redis://localhost:6379", "modelconv:jobs");
        assert_eq!(config.dlq_stream, "modelconv:jobs:dlq");
        assert_eq!(config.consumer_group, "modelconv:workers");

        let config = config.with_consumer_group("g").with_dlq_stream("d");
        assert_eq!(config.consumer_group, "g");
        assert_eq!(config.dlq_stream, "d");
    }
}
