//! Per-task scratch directory for frame files.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use webpforge_common::{Error, Result};

/// Temporary directory owned by one running task.
///
/// Removed by [`TaskWorkspace::cleanup`] or, failing that, on drop.
#[derive(Debug)]
pub struct TaskWorkspace {
    temp_dir: TempDir,
}

impl TaskWorkspace {
    /// Create a workspace under `parent`, or the system temp dir when `None`.
    pub fn new(parent: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let temp_dir = match parent {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| Error::internal(format!("failed to create workspace: {e}")))?;

        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Where frame `index` is extracted to.
    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.temp_dir.path().join(format!("frame_{index}.webp"))
    }

    /// Where the compressed copy of frame `index` is written.
    pub fn compressed_path(&self, index: usize) -> PathBuf {
        Self::compressed_path_in(self.temp_dir.path(), index)
    }

    /// [`TaskWorkspace::compressed_path`] for a workspace known only by its directory.
    pub fn compressed_path_in(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("frame_compressed_{index}.webp"))
    }

    /// Delete the directory. Failures are logged, never returned.
    pub fn cleanup(self) {
        let path = self.temp_dir.path().to_path_buf();
        match self.temp_dir.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed task workspace"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove task workspace"),
        }
    }
}
