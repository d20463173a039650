//! Output file resolution and verification.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{BlenderResult, ConversionError};

/// Stdout line prefix the conversion script uses to report its output.
pub const OUTPUT_MARKER: &str = "OUTPUT_FILE=";

/// Path reported on a stdout line, if the line is an output marker.
pub fn parse_output_marker(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix(OUTPUT_MARKER)
        .map(str::trim)
        .filter(|path| !path.is_empty())
}

/// Resolve the tool's reported output against the requested path.
///
/// Exactly one marker is required and it must name the requested file.
/// Anything else means the output cannot be trusted.
pub async fn resolve_output(markers: &[String], expected: &Path) -> BlenderResult<PathBuf> {
    let reported = match markers {
        [] => {
            return Err(ConversionError::OutputUndeterminable(format!(
                "tool printed no {} line",
                OUTPUT_MARKER
            )))
        }
        [single] => PathBuf::from(single),
        many => {
            return Err(ConversionError::OutputUndeterminable(format!(
                "tool printed {} {} lines",
                many.len(),
                OUTPUT_MARKER
            )))
        }
    };

    if reported == expected {
        return Ok(reported);
    }

    // Same file reached through a different spelling (symlinked temp dir).
    if let (Ok(a), Ok(b)) = (
        tokio::fs::canonicalize(&reported).await,
        tokio::fs::canonicalize(expected).await,
    ) {
        if a == b {
            return Ok(expected.to_path_buf());
        }
    }

    Err(ConversionError::OutputUndeterminable(format!(
        "tool reported {} but {} was requested",
        reported.display(),
        expected.display()
    )))
}

/// Check that `path` is a regular, non-empty file. Returns its size.
pub async fn verify_output(path: &Path) -> BlenderResult<u64> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConversionError::OutputMissing(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_file() {
        return Err(ConversionError::OutputMissing(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(ConversionError::OutputEmpty(path.to_path_buf()));
    }
    Ok(metadata.len())
}
