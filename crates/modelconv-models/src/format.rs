//! 3D file formats and the source → target compatibility table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// File formats known to the conversion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Blender scene
    Blend,
    /// Binary glTF
    Glb,
    /// glTF JSON with separate buffers/textures
    Gltf,
    /// Wavefront OBJ
    Obj,
    /// Autodesk FBX
    Fbx,
    /// Universal Scene Description
    Usd,
    /// Zipped USD package
    Usdz,
}

/// Supported (source, targets) pairs.
///
/// The conversion script only opens Blender scenes, so `blend` is the only
/// accepted source.
const COMPATIBILITY: &[(FileFormat, &[FileFormat])] = &[(
    FileFormat::Blend,
    &[
        FileFormat::Glb,
        FileFormat::Gltf,
        FileFormat::Obj,
        FileFormat::Fbx,
        FileFormat::Usd,
        FileFormat::Usdz,
    ],
)];

impl FileFormat {
    pub const ALL: &'static [FileFormat] = &[
        FileFormat::Blend,
        FileFormat::Glb,
        FileFormat::Gltf,
        FileFormat::Obj,
        FileFormat::Fbx,
        FileFormat::Usd,
        FileFormat::Usdz,
    ];

    /// Lowercase tag as used on the wire and as file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Blend => "blend",
            FileFormat::Glb => "glb",
            FileFormat::Gltf => "gltf",
            FileFormat::Obj => "obj",
            FileFormat::Fbx => "fbx",
            FileFormat::Usd => "usd",
            FileFormat::Usdz => "usdz",
        }
    }

    /// File extension (without dot).
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// MIME type used when uploading a converted file.
    pub fn content_type(&self) -> &'static str {
        match self {
            FileFormat::Glb => "model/gltf-binary",
            FileFormat::Gltf => "model/gltf+json",
            FileFormat::Obj => "model/obj",
            FileFormat::Usdz => "model/vnd.usdz+zip",
            FileFormat::Blend | FileFormat::Fbx | FileFormat::Usd => "application/octet-stream",
        }
    }

    /// Target formats this format can be converted into.
    pub fn supported_targets(&self) -> &'static [FileFormat] {
        COMPATIBILITY
            .iter()
            .find(|(source, _)| source == self)
            .map(|(_, targets)| *targets)
            .unwrap_or(&[])
    }

    /// Whether `self → target` is in the compatibility table.
    pub fn can_convert_to(&self, target: FileFormat) -> bool {
        self.supported_targets().contains(&target)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "blend" => Ok(FileFormat::Blend),
            "glb" => Ok(FileFormat::Glb),
            "gltf" => Ok(FileFormat::Gltf),
            "obj" => Ok(FileFormat::Obj),
            "fbx" => Ok(FileFormat::Fbx),
            "usd" => Ok(FileFormat::Usd),
            "usdz" => Ok(FileFormat::Usdz),
            _ => Err(FormatParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown file format: {0}")]
pub struct FormatParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("GLB".parse::<FileFormat>().unwrap(), FileFormat::Glb);
        assert_eq!(" blend ".parse::<FileFormat>().unwrap(), FileFormat::Blend);
        assert!("vox".parse::<FileFormat>().is_err());
    }

    #[test]
    fn test_blend_targets() {
        for target in [
            FileFormat::Glb,
            FileFormat::Gltf,
            FileFormat::Obj,
            FileFormat::Fbx,
            FileFormat::Usd,
            FileFormat::Usdz,
        ] {
            assert!(FileFormat::Blend.can_convert_to(target), "blend -> {target}");
        }
        assert!(!FileFormat::Blend.can_convert_to(FileFormat::Blend));
    }

    #[test]
    fn test_only_blend_is_a_source() {
        for format in FileFormat::ALL.iter().filter(|f| **f != FileFormat::Blend) {
            assert!(format.supported_targets().is_empty(), "{format} should not be a source");
        }
    }

    #[test]
    fn test_display_matches_serde_tag() {
        for format in FileFormat::ALL {
            let json = serde_json::to_string(format).unwrap();
            assert_eq!(json, format!("\"{}\"", format));
        }
    }
}
