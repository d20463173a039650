//! Blender process runner.

use std::io::{self, ErrorKind};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capture::{BoundedCapture, Retain, DEFAULT_CAPTURE_LIMIT};
use crate::command::BlenderCommand;
use crate::error::{BlenderResult, ConversionError};
use crate::output::parse_output_marker;

/// Default wall-clock limit for one invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// How long to wait for output pipes to drain once the process has exited.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Paths from `OUTPUT_FILE=` lines, in order
    pub output_markers: Vec<String>,
    pub elapsed: Duration,
}

/// Runs Blender commands with a timeout and bounded output capture.
#[derive(Debug, Clone)]
pub struct BlenderRunner {
    timeout: Duration,
    capture_limit: usize,
}

impl Default for BlenderRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BlenderRunner {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-stream capture limit in bytes.
    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a command to completion.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`ToolOutput::success`]. Exceeding the timeout kills the process.
    pub async fn run(&self, cmd: &BlenderCommand) -> BlenderResult<ToolOutput> {
        let args = cmd.build_args();
        debug!("Running Blender: {} {}", cmd.program(), args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(cmd.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ConversionError::ToolNotFound(cmd.program().to_string()),
                _ => ConversionError::Spawn(e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| not_captured("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_captured("stderr"))?;

        let limit = self.capture_limit;
        let mut stdout_task = tokio::spawn(read_stdout(stdout, limit));
        let mut stderr_task = tokio::spawn(read_stderr(stderr, limit));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "Blender timed out after {} seconds, killing process",
                    self.timeout.as_secs()
                );
                let _ = child.kill().await;
                stdout_task.abort();
                let stderr = join_reader(&mut stderr_task).await.unwrap_or_default();
                return Err(ConversionError::Timeout {
                    limit: self.timeout,
                    stderr,
                });
            }
        };

        let (stdout, output_markers) = join_reader(&mut stdout_task).await.unwrap_or_default();
        let stderr = join_reader(&mut stderr_task).await.unwrap_or_default();
        let elapsed = started.elapsed();

        debug!(
            "Blender exited with {:?} after {:.1}s",
            status.code(),
            elapsed.as_secs_f64()
        );

        Ok(ToolOutput {
            exit_code: status.code(),
            success: status.success(),
            stdout,
            stderr,
            output_markers,
            elapsed,
        })
    }
}

fn not_captured(stream: &str) -> ConversionError {
    ConversionError::Spawn(io::Error::new(
        ErrorKind::Other,
        format!("{} not captured", stream),
    ))
}

/// Read stdout line by line, keeping the head and collecting output markers.
async fn read_stdout<R>(stream: R, limit: usize) -> io::Result<(String, Vec<String>)>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut capture = BoundedCapture::new(limit, Retain::Head);
    let mut markers = Vec::new();
    let mut line = Vec::new();
    let mut at_line_start = true;

    loop {
        line.clear();
        // Bounded so a newline-free stream cannot grow the line buffer.
        let n = (&mut reader)
            .take(limit as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            break;
        }

        capture.push(&line);
        if at_line_start {
            if let Some(path) = parse_output_marker(&String::from_utf8_lossy(&line)) {
                markers.push(path.to_string());
            }
        }
        at_line_start = line.ends_with(b"\n");
    }

    Ok((capture.into_text(), markers))
}

/// Read stderr, keeping the tail.
async fn read_stderr<R>(mut stream: R, limit: usize) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut capture = BoundedCapture::new(limit, Retain::Tail);
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        capture.push(&chunk[..n]);
    }
    Ok(capture.into_text())
}

/// Collect a reader task, abandoning it if the pipe stays open (a surviving
/// grandchild can hold it).
async fn join_reader<T>(task: &mut JoinHandle<io::Result<T>>) -> Option<T> {
    match tokio::time::timeout(READER_GRACE, &mut *task).await {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(e))) => {
            warn!("Failed to read tool output: {}", e);
            None
        }
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            None
        }
        Err(_) => {
            task.abort();
            warn!("Tool output pipe still open after exit, abandoning reader");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Run an inline shell script through `/bin/sh -c`.
    fn sh(script: &str) -> BlenderCommand {
        BlenderCommand::new("/bin/sh", Path::new("unused.py")).launcher_args(["-c", script, "sh"])
    }

    #[tokio::test]
    async fn test_captures_streams_and_markers() {
        let cmd = sh("echo 'Blender 4.1'; echo 'OUTPUT_FILE=/w/m1.glb'; echo 'warn: x' >&2");
        let output = BlenderRunner::new().run(&cmd).await.unwrap();

        assert!(output.success);
        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.contains("Blender 4.1"));
        assert_eq!(output.stderr, "warn: x\n");
        assert_eq!(output.output_markers, vec!["/w/m1.glb".to_string()]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let cmd = sh("echo 'Unknown node type' >&2; exit 3");
        let output = BlenderRunner::new().run(&cmd).await.unwrap();

        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "Unknown node type");
    }

    #[tokio::test]
    async fn test_stderr_is_bounded_to_tail() {
        let cmd = sh("i=0; while [ $i -lt 200 ]; do echo \"line $i\" >&2; i=$((i+1)); done; echo 'last' >&2");
        let output = BlenderRunner::new()
            .with_capture_limit(64)
            .run(&cmd)
            .await
            .unwrap();

        assert!(output.stderr.starts_with("[... "));
        assert!(output.stderr.ends_with("last\n"));
        assert!(output.stderr.len() < 128);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let cmd = sh("echo 'loading' >&2; exec sleep 30");
        let started = Instant::now();
        let err = BlenderRunner::new()
            .with_timeout(Duration::from_millis(300))
            .run(&cmd)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cmd = BlenderCommand::new("/nonexistent/blender-binary", "convert.py");
        let err = BlenderRunner::new().run(&cmd).await.unwrap_err();
        assert!(matches!(err, ConversionError::ToolNotFound(_)));
    }
}
