//! Redis Streams intake and notification channels.
//!
//! This crate provides:
//! - The [`IntakeChannel`] / [`NotificationChannel`] seams
//! - Consumer-group intake with visibility-timeout reclaim and a DLQ
//! - A stream-backed notification channel

pub mod channel;
pub mod error;
pub mod notification;
pub mod queue;

#[cfg(any(test, feature = "mocks"))]
pub use channel::{MockIntakeChannel, MockNotificationChannel};
pub use channel::{Delivery, IntakeChannel, NotificationChannel};
pub use error::{QueueError, QueueResult};
pub use notification::NotificationStream;
pub use queue::{JobQueue, QueueConfig};
