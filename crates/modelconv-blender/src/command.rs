//! Blender command builder.

use std::path::{Path, PathBuf};

use modelconv_models::{FileFormat, JobDescriptor};

use crate::options::export_options;

/// Builder for a headless Blender invocation.
///
/// Produces `<program> [launcher args] --background --python <script> --
/// --key=value ...`. Everything after `--` is read by the conversion script.
#[derive(Debug, Clone)]
pub struct BlenderCommand {
    /// Executable to spawn
    program: String,
    /// Arguments placed before the Blender flags
    launcher_args: Vec<String>,
    /// Conversion script path
    script: PathBuf,
    /// Script arguments, in order
    script_args: Vec<(String, String)>,
}

impl BlenderCommand {
    /// Create a new command for the given executable and script.
    pub fn new(program: impl Into<String>, script: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            launcher_args: Vec::new(),
            script: script.as_ref().to_path_buf(),
            script_args: Vec::new(),
        }
    }

    /// Add arguments placed before the Blender flags.
    pub fn launcher_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one `--key=value` script argument.
    pub fn script_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.script_args.push((key.into(), value.into()));
        self
    }

    /// Add the job's correlation arguments and the export options for
    /// `export_format`, writing `input` to `output`.
    pub fn for_export(
        self,
        job: &JobDescriptor,
        export_format: FileFormat,
        input: &Path,
        output: &Path,
    ) -> Self {
        let mut cmd = self
            .script_arg("inputFile", input.to_string_lossy())
            .script_arg("outputFile", output.to_string_lossy())
            .script_arg("fromFileType", job.from_format().as_str())
            .script_arg("toFileType", export_format.as_str())
            .script_arg("modelId", job.model_id())
            .script_arg("s3Key", job.source().key.as_str())
            .script_arg("jobType", job.job_type());

        if let Some(export) = export_options(export_format) {
            cmd = cmd.script_arg("exporter", export.exporter);
            for (name, value) in export.options {
                cmd = cmd.script_arg(*name, *value);
            }
        }
        cmd
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Value of a script argument, if set.
    pub fn script_arg_value(&self, key: &str) -> Option<&str> {
        self.script_args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.launcher_args.clone();

        args.push("--background".to_string());
        args.push("--python".to_string());
        args.push(self.script.to_string_lossy().to_string());

        args.push("--".to_string());
        args.extend(
            self.script_args
                .iter()
                .map(|(key, value)| format!("--{}={}", key, value)),
        );

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(to: &str) -> JobDescriptor {
        let body = format!(
            r#"{{"jobId":"j1","modelId":"m1","fromFileType":"blend","toFileType":"{}","s3Key":"in/m1.blend"}}"#,
            to
        );
        JobDescriptor::parse(&body, "models").unwrap()
    }

    #[test]
    fn test_flag_layout() {
        let args = BlenderCommand::new("blender", "/opt/convert.py")
            .launcher_args(["--factory-startup"])
            .script_arg("inputFile", "/w/m1.blend")
            .build_args();

        assert_eq!(
            args,
            vec![
                "--factory-startup",
                "--background",
                "--python",
                "/opt/convert.py",
                "--",
                "--inputFile=/w/m1.blend",
            ]
        );
    }

    #[test]
    fn test_export_args_carry_correlation_and_options() {
        let cmd = BlenderCommand::new("blender", "convert.py").for_export(
            &job("fbx"),
            FileFormat::Fbx,
            Path::new("/w/m1.blend"),
            Path::new("/w/m1.fbx"),
        );
        let args = cmd.build_args();

        for expected in [
            "--inputFile=/w/m1.blend",
            "--outputFile=/w/m1.fbx",
            "--fromFileType=blend",
            "--toFileType=fbx",
            "--modelId=m1",
            "--s3Key=in/m1.blend",
            "--jobType=conversion",
            "--exporter=fbx",
            "--bake_space_transform=true",
        ] {
            assert!(args.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(cmd.script_arg_value("outputFile"), Some("/w/m1.fbx"));
    }

    #[test]
    fn test_usdz_job_exports_usd_stage() {
        let cmd = BlenderCommand::new("blender", "convert.py").for_export(
            &job("usdz"),
            FileFormat::Usd,
            Path::new("/w/m1.blend"),
            Path::new("/w/m1.usd"),
        );
        assert_eq!(cmd.script_arg_value("toFileType"), Some("usd"));
        assert_eq!(cmd.script_arg_value("exporter"), Some("usd"));
    }
}
