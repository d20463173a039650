//! usdz packaging.
//!
//! A usdz file is an uncompressed zip archive whose first entry is the USD
//! layer, with every entry's data aligned to 64 bytes.

use std::fs::File;
use std::io;
use std::path::Path;

use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{BlenderResult, ConversionError};

const USDZ_ALIGNMENT: u16 = 64;

impl From<ZipError> for ConversionError {
    fn from(e: ZipError) -> Self {
        ConversionError::Packaging(e.to_string())
    }
}

/// Package a USD layer into a usdz archive. Blocking.
pub fn package_usdz(layer: &Path, archive: &Path) -> BlenderResult<()> {
    let entry_name = layer
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ConversionError::Packaging(format!("invalid layer path: {}", layer.display())))?;

    let mut writer = ZipWriter::new(File::create(archive)?);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .with_alignment(USDZ_ALIGNMENT);

    writer.start_file(entry_name.clone(), options)?;
    let mut input = File::open(layer)?;
    let written = io::copy(&mut input, &mut writer)?;
    writer.finish()?;

    debug!("Packaged {} ({} bytes) into {}", entry_name, written, archive.display());
    verify_usdz(archive, &entry_name)
}

/// Reopen the archive and check it holds the expected non-empty layer.
fn verify_usdz(archive: &Path, entry_name: &str) -> BlenderResult<()> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    if zip.len() != 1 {
        return Err(ConversionError::Packaging(format!(
            "expected 1 entry in {}, found {}",
            archive.display(),
            zip.len()
        )));
    }

    let entry = zip.by_index(0)?;
    if entry.name() != entry_name || entry.size() == 0 {
        return Err(ConversionError::Packaging(format!(
            "unexpected entry {} ({} bytes)",
            entry.name(),
            entry.size()
        )));
    }
    if entry.compression() != CompressionMethod::Stored {
        return Err(ConversionError::Packaging("usdz entries must be stored".to_string()));
    }
    Ok(())
}
