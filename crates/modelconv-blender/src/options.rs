//! Per-format export options and conversion plans.

use modelconv_models::FileFormat;

/// Exporter selection and options passed to the conversion script for a
/// target format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Exporter the script should call
    pub exporter: &'static str,
    /// Options forwarded verbatim as `--name=value`
    pub options: &'static [(&'static str, &'static str)],
}

const GLB: ExportOptions = ExportOptions {
    exporter: "gltf",
    options: &[
        ("export_format", "GLB"),
        ("export_texcoords", "true"),
        ("export_normals", "true"),
        ("export_yup", "true"),
    ],
};

const GLTF: ExportOptions = ExportOptions {
    exporter: "gltf",
    options: &[
        ("export_format", "GLTF_SEPARATE"),
        ("export_texcoords", "true"),
        ("export_normals", "true"),
        ("export_yup", "true"),
    ],
};

// Keyword names of `wm.obj_export`, not the legacy `export_scene.obj`.
const OBJ: ExportOptions = ExportOptions {
    exporter: "obj",
    options: &[("export_materials", "true")],
};

const FBX: ExportOptions = ExportOptions {
    exporter: "fbx",
    options: &[
        ("use_selection", "false"),
        ("apply_unit_scale", "true"),
        ("bake_space_transform", "true"),
    ],
};

const USD: ExportOptions = ExportOptions {
    exporter: "usd",
    options: &[],
};

/// Export options for a format the script can write directly.
///
/// Returns `None` for formats that are not direct export targets (the
/// source format, and `usdz`, which is packaged from a `usd` export).
pub fn export_options(format: FileFormat) -> Option<ExportOptions> {
    match format {
        FileFormat::Glb => Some(GLB),
        FileFormat::Gltf => Some(GLTF),
        FileFormat::Obj => Some(OBJ),
        FileFormat::Fbx => Some(FBX),
        FileFormat::Usd => Some(USD),
        FileFormat::Usdz | FileFormat::Blend => None,
    }
}

/// How a target format is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPlan {
    /// One tool invocation writes the final file
    Direct(FileFormat),
    /// The tool writes `intermediate`, which is then packaged into the target
    Packaged {
        intermediate: FileFormat,
        target: FileFormat,
    },
}

impl ExportPlan {
    pub fn for_target(target: FileFormat) -> Self {
        match target {
            FileFormat::Usdz => ExportPlan::Packaged {
                intermediate: FileFormat::Usd,
                target,
            },
            other => ExportPlan::Direct(other),
        }
    }

    /// Format the tool is asked to export.
    pub fn export_format(&self) -> FileFormat {
        match self {
            ExportPlan::Direct(format) => *format,
            ExportPlan::Packaged { intermediate, .. } => *intermediate,
        }
    }

    pub fn target(&self) -> FileFormat {
        match self {
            ExportPlan::Direct(format) => *format,
            ExportPlan::Packaged { target, .. } => *target,
        }
    }

    pub fn is_multi_stage(&self) -> bool {
        matches!(self, ExportPlan::Packaged { .. })
    }
}
