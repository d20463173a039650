//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }
}
