//! Model conversion worker.
//!
//! This crate provides:
//! - Job processing (validate, download, convert, upload, notify, delete)
//! - A bounded worker pool with stale-message reclaim and dead-lettering
//! - Configuration, retry, logging and metrics helpers

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod processor;
pub mod retry;
pub mod state;
pub mod workspace;

pub use config::WorkerConfig;
pub use error::{JobFailure, WorkerError, WorkerResult};
pub use executor::{ExecutorSettings, JobExecutor};
pub use logging::JobLogger;
pub use notifier::Notifier;
pub use processor::{JobProcessor, JobReport, ProcessorSettings};
pub use retry::{retry_async, RetryConfig};
pub use state::JobState;
pub use workspace::JobWorkspace;
