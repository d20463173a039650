//! Blender CLI wrapper for model conversion.
//!
//! This crate provides:
//! - A builder for headless Blender invocations ([`BlenderCommand`])
//! - A runner with timeout, kill-on-drop and bounded output capture
//! - Output resolution from the script's `OUTPUT_FILE=` line
//! - Per-format export options and usdz packaging
//! - The [`Converter`] seam used by the worker

pub mod capture;
pub mod command;
pub mod converter;
pub mod error;
pub mod options;
pub mod output;
pub mod package;
pub mod runner;

pub use command::BlenderCommand;
#[cfg(any(test, feature = "mocks"))]
pub use converter::MockConverter;
pub use converter::{check_blender, BlenderConfig, BlenderConverter, Converter, WorkspacePaths};
pub use error::{BlenderResult, ConversionError, Stage};
pub use options::{export_options, ExportOptions, ExportPlan};
pub use output::OUTPUT_MARKER;
pub use runner::{BlenderRunner, ToolOutput, DEFAULT_TIMEOUT};
