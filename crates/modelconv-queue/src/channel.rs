//! Channel seams used by the worker loop.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// One received intake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-assigned message ID, used to delete the message
    pub id: String,
    /// Raw message body (expected to be a JSON job)
    pub body: String,
    /// How many times this message has been handed to a consumer (1 on first receive)
    pub delivery_count: u32,
}

impl Delivery {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            delivery_count: 1,
        }
    }

    pub fn with_delivery_count(mut self, count: u32) -> Self {
        self.delivery_count = count;
        self
    }
}

/// At-least-once intake channel.
///
/// A received message stays owned by this consumer until it is deleted; if it
/// is never deleted (worker crash) it becomes reclaimable once idle longer
/// than the visibility timeout.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait IntakeChannel: Send + Sync {
    /// Receive up to `max_messages`, blocking at most `wait`.
    async fn receive(&self, max_messages: usize, wait: Duration) -> QueueResult<Vec<Delivery>>;

    /// Take over messages delivered earlier but not deleted within `min_idle`.
    async fn reclaim_stale(&self, min_idle: Duration, max_messages: usize)
        -> QueueResult<Vec<Delivery>>;

    /// Reset the idle clock of messages this consumer is still processing,
    /// so they are not reclaimed while the job runs.
    async fn touch(&self, delivery_ids: &[String]) -> QueueResult<()>;

    /// Remove a message permanently.
    async fn delete(&self, delivery_id: &str) -> QueueResult<()>;

    /// Copy a message to the dead-letter channel, then delete it.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;
}

/// Outbound channel for job outcome records.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Send a serialized record. Returns the channel-assigned message ID.
    async fn send(&self, body: &str) -> QueueResult<String>;
}
