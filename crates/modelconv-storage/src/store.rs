//! Object store seam used by the worker.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use modelconv_models::ObjectLocator;

use crate::error::StorageResult;

/// Download/upload of whole objects to and from local files.
///
/// Implementations must never leave a partially written object visible as a
/// success, and never write outside the given local path.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download `source` into the local file `destination`.
    async fn download(&self, source: &ObjectLocator, destination: &Path) -> StorageResult<()>;

    /// Upload the local file `source` to `destination`.
    async fn upload(
        &self,
        source: &Path,
        destination: &ObjectLocator,
        content_type: &str,
    ) -> StorageResult<()>;
}

/// Staging path for an in-progress download, next to its final location.
pub(crate) fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_is_sibling() {
        let p = partial_path(Path::new("/tmp/job/m1.blend"));
        assert_eq!(p, PathBuf::from("/tmp/job/m1.blend.part"));
    }
}
