//! Conversion entry point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use modelconv_models::{FileFormat, JobDescriptor};
use tracing::{debug, info};

use crate::command::BlenderCommand;
use crate::error::{BlenderResult, ConversionError, Stage};
use crate::options::ExportPlan;
use crate::output::{resolve_output, verify_output};
use crate::package::package_usdz;
use crate::runner::{BlenderRunner, DEFAULT_TIMEOUT};

/// Files of one job inside its private working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub dir: PathBuf,
    /// Downloaded source file
    pub input: PathBuf,
    /// Final converted file
    pub output: PathBuf,
}

impl WorkspacePaths {
    pub fn for_job(dir: &Path, job: &JobDescriptor) -> Self {
        Self {
            dir: dir.to_path_buf(),
            input: dir.join(job.input_file_name()),
            output: dir.join(job.output_file_name()),
        }
    }

    /// Path of an intermediate file in `format`.
    pub fn intermediate(&self, format: FileFormat) -> PathBuf {
        self.output.with_extension(format.extension())
    }
}

/// Produces the converted file for a job.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `paths.input` into `paths.output`. On success the returned
    /// path exists and is non-empty.
    async fn convert(&self, job: &JobDescriptor, paths: &WorkspacePaths) -> BlenderResult<PathBuf>;
}

/// Blender invocation settings.
#[derive(Debug, Clone)]
pub struct BlenderConfig {
    /// Executable to spawn
    pub program: String,
    /// Arguments placed before the Blender flags
    pub launcher_args: Vec<String>,
    /// Conversion script path
    pub script: PathBuf,
    pub timeout: Duration,
}

impl BlenderConfig {
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            launcher_args: Vec::new(),
            script: script.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_launcher_args(mut self, args: Vec<String>) -> Self {
        self.launcher_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Converts models by running Blender headless with the conversion script.
pub struct BlenderConverter {
    config: BlenderConfig,
    runner: BlenderRunner,
}

impl BlenderConverter {
    pub fn new(config: BlenderConfig) -> Self {
        let runner = BlenderRunner::new().with_timeout(config.timeout);
        Self { config, runner }
    }

    pub fn with_runner(mut self, runner: BlenderRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &BlenderConfig {
        &self.config
    }

    /// Run one export and verify the file it reports.
    async fn export(
        &self,
        job: &JobDescriptor,
        format: FileFormat,
        input: &Path,
        output: &Path,
    ) -> BlenderResult<PathBuf> {
        let cmd = BlenderCommand::new(&self.config.program, &self.config.script)
            .launcher_args(self.config.launcher_args.iter().cloned())
            .for_export(job, format, input, output);

        let result = self.runner.run(&cmd).await?;
        if !result.success {
            return Err(ConversionError::ToolFailed {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        let produced = resolve_output(&result.output_markers, output).await?;
        let size = verify_output(&produced).await?;
        debug!(
            "Exported {} ({} bytes) in {:.1}s",
            produced.display(),
            size,
            result.elapsed.as_secs_f64()
        );
        Ok(produced)
    }
}

#[async_trait]
impl Converter for BlenderConverter {
    async fn convert(&self, job: &JobDescriptor, paths: &WorkspacePaths) -> BlenderResult<PathBuf> {
        match ExportPlan::for_target(job.to_format()) {
            ExportPlan::Direct(format) => {
                self.export(job, format, &paths.input, &paths.output).await
            }
            ExportPlan::Packaged { intermediate, target } => {
                let layer = paths.intermediate(intermediate);
                self.export(job, intermediate, &paths.input, &layer)
                    .await
                    .map_err(|e| e.in_stage(Stage::Export))?;

                let archive = paths.output.clone();
                tokio::task::spawn_blocking(move || package_usdz(&layer, &archive))
                    .await
                    .map_err(|e| ConversionError::Packaging(e.to_string()).in_stage(Stage::Package))?
                    .map_err(|e| e.in_stage(Stage::Package))?;

                verify_output(&paths.output)
                    .await
                    .map_err(|e| e.in_stage(Stage::Package))?;
                info!("Packaged {} into {}", intermediate, target);
                Ok(paths.output.clone())
            }
        }
    }
}

/// Check if the Blender executable is available.
pub fn check_blender(program: &str) -> BlenderResult<PathBuf> {
    which::which(program).map_err(|_| ConversionError::ToolNotFound(program.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(to: &str) -> JobDescriptor {
        let body = format!(
            r#"{{"jobId":"j1","modelId":"m1","fromFileType":"blend","toFileType":"{}","s3Key":"blend/m1.blend"}}"#,
            to
        );
        JobDescriptor::parse(&body, "models").unwrap()
    }

    /// Converter that runs `script` through `/bin/sh`. The script sees the
    /// Blender flags as positional arguments.
    fn fake_converter(dir: &Path, script: &str) -> BlenderConverter {
        let path = dir.join("fake_blender.sh");
        std::fs::write(&path, script).unwrap();
        let config = BlenderConfig::new("/bin/sh", "convert.py")
            .with_launcher_args(vec![path.to_string_lossy().into_owned()])
            .with_timeout(Duration::from_secs(30));
        BlenderConverter::new(config)
    }

    /// Shell snippet that writes to the `--outputFile=` argument and reports it.
    const WRITE_OUTPUT: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --outputFile=*) out="${arg#--outputFile=}" ;;
  esac
done
"#;

    fn workspace(dir: &Path, job: &JobDescriptor) -> WorkspacePaths {
        let paths = WorkspacePaths::for_job(dir, job);
        std::fs::write(&paths.input, b"BLENDER-v300").unwrap();
        paths
    }

    #[test]
    fn test_workspace_paths() {
        let paths = WorkspacePaths::for_job(Path::new("/tmp/job"), &job("usdz"));
        assert_eq!(paths.input, Path::new("/tmp/job/m1.blend"));
        assert_eq!(paths.output, Path::new("/tmp/job/m1.usdz"));
        assert_eq!(paths.intermediate(FileFormat::Usd), Path::new("/tmp/job/m1.usd"));
    }

    #[tokio::test]
    async fn test_successful_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("{}printf 'glTF' > \"$out\"\necho \"OUTPUT_FILE=$out\"\n", WRITE_OUTPUT);
        let converter = fake_converter(dir.path(), &script);
        let job = job("glb");
        let paths = workspace(dir.path(), &job);

        let produced = converter.convert(&job, &paths).await.unwrap();
        assert_eq!(produced, paths.output);
        assert_eq!(std::fs::read(&produced).unwrap(), b"glTF");
    }

    #[tokio::test]
    async fn test_tool_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let converter = fake_converter(dir.path(), "echo 'Unknown node type' >&2\nexit 1\n");
        let job = job("glb");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(matches!(err, ConversionError::ToolFailed { exit_code: Some(1), .. }));
        assert_eq!(err.operator_message(), "Unknown node type");
    }

    #[tokio::test]
    async fn test_success_exit_without_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("{}printf 'glTF' > \"$out\"\n", WRITE_OUTPUT);
        let converter = fake_converter(dir.path(), &script);
        let job = job("glb");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(matches!(err, ConversionError::OutputUndeterminable(_)));
    }

    #[tokio::test]
    async fn test_multiple_markers_fail() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "{}printf 'glTF' > \"$out\"\necho \"OUTPUT_FILE=$out\"\necho \"OUTPUT_FILE=$out\"\n",
            WRITE_OUTPUT
        );
        let converter = fake_converter(dir.path(), &script);
        let job = job("glb");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(matches!(err, ConversionError::OutputUndeterminable(_)));
    }

    #[tokio::test]
    async fn test_marker_for_other_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "{}printf 'glTF' > \"$out\"\necho 'OUTPUT_FILE=/tmp/not-the-output.glb'\n",
            WRITE_OUTPUT
        );
        let converter = fake_converter(dir.path(), &script);
        let job = job("glb");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(matches!(err, ConversionError::OutputUndeterminable(_)));
    }

    #[tokio::test]
    async fn test_reported_but_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("{}echo \"OUTPUT_FILE=$out\"\n", WRITE_OUTPUT);
        let converter = fake_converter(dir.path(), &script);
        let job = job("obj");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(matches!(err, ConversionError::OutputMissing(_)));
    }

    #[tokio::test]
    async fn test_empty_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("{}: > \"$out\"\necho \"OUTPUT_FILE=$out\"\n", WRITE_OUTPUT);
        let converter = fake_converter(dir.path(), &script);
        let job = job("fbx");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(matches!(err, ConversionError::OutputEmpty(_)));
    }

    #[tokio::test]
    async fn test_script_receives_export_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args.txt");
        let script = format!(
            "{}printf '%s\\n' \"$@\" > '{}'\nprintf 'fbx' > \"$out\"\necho \"OUTPUT_FILE=$out\"\n",
            WRITE_OUTPUT,
            args_file.display()
        );
        let converter = fake_converter(dir.path(), &script);
        let job = job("fbx");
        let paths = workspace(dir.path(), &job);

        converter.convert(&job, &paths).await.unwrap();
        let args = std::fs::read_to_string(&args_file).unwrap();
        let args: Vec<&str> = args.lines().collect();

        assert_eq!(&args[..3], &["--background", "--python", "convert.py"]);
        assert!(args.contains(&"--"));
        assert!(args.contains(&format!("--inputFile={}", paths.input.display()).as_str()));
        assert!(args.contains(&"--toFileType=fbx"));
        assert!(args.contains(&"--s3Key=blend/m1.blend"));
        assert!(args.contains(&"--apply_unit_scale=true"));
    }

    #[tokio::test]
    async fn test_usdz_runs_export_then_package() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "{}case \"$out\" in *.usd) ;; *) echo \"unexpected $out\" >&2; exit 2 ;; esac\nprintf 'PXR-USDC' > \"$out\"\necho \"OUTPUT_FILE=$out\"\n",
            WRITE_OUTPUT
        );
        let converter = fake_converter(dir.path(), &script);
        let job = job("usdz");
        let paths = workspace(dir.path(), &job);

        let produced = converter.convert(&job, &paths).await.unwrap();
        assert_eq!(produced, dir.path().join("m1.usdz"));
        assert!(dir.path().join("m1.usd").exists());

        let archive = zip::ZipArchive::new(std::fs::File::open(&produced).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn test_usdz_export_failure_names_stage() {
        let dir = tempfile::tempdir().unwrap();
        let converter = fake_converter(dir.path(), "echo 'USD exporter missing' >&2\nexit 1\n");
        let job = job("usdz");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(matches!(err, ConversionError::StageFailed { stage: Stage::Export, .. }));
        assert_eq!(
            err.operator_message(),
            "export stage failed: USD exporter missing"
        );
        assert!(!paths.output.exists());
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let converter = fake_converter(dir.path(), "exec sleep 30\n")
            .with_runner(BlenderRunner::new().with_timeout(Duration::from_millis(300)));
        let job = job("glb");
        let paths = workspace(dir.path(), &job);

        let err = converter.convert(&job, &paths).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.operator_message().contains("timed out"));
    }

    #[test]
    fn test_check_missing_blender() {
        assert!(check_blender("definitely-not-blender-xyz").is_err());
    }
}
