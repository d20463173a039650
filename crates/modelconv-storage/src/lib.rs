//! Object storage gateway.
//!
//! This crate provides:
//! - The [`ObjectStore`] seam (download to / upload from local files)
//! - An S3 implementation with bounded per-call timeouts
//! - Not-found / access-denied / transient error classification

pub mod client;
pub mod error;
pub mod store;

pub use client::{S3Config, S3Store};
pub use error::{StorageError, StorageResult};
#[cfg(any(test, feature = "mocks"))]
pub use store::MockObjectStore;
pub use store::ObjectStore;
