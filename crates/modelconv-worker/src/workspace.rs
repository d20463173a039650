//! Per-job scratch directories.

use std::io;
use std::path::Path;

use modelconv_blender::WorkspacePaths;
use modelconv_models::JobDescriptor;
use tempfile::TempDir;

/// Longest job ID fragment used in a directory name.
const MAX_PREFIX_ID_LEN: usize = 48;

/// Exclusive local directory for one job.
///
/// The directory and everything in it is removed when the workspace is
/// dropped, on every exit path.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
    paths: WorkspacePaths,
}

impl JobWorkspace {
    /// Create a fresh workspace under `root`.
    pub fn create(root: &Path, job: &JobDescriptor) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("modelconv-{}-", dir_safe(job.job_id())))
            .tempdir_in(root)?;
        let paths = WorkspacePaths::for_job(dir.path(), job);
        Ok(Self { dir, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    /// Remove the workspace now, reporting any error.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

fn dir_safe(job_id: &str) -> String {
    job_id
        .chars()
        .take(MAX_PREFIX_ID_LEN)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
