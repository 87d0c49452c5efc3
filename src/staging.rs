//! Ephemeral staging directories for in-progress stage output.
//!
//! A staging directory is exclusively owned by the stage that acquired it and
//! is removed, with everything inside it, when its guard is dropped. That
//! covers normal return, error return, and cancellation of the future that
//! holds the guard.

use std::future::Future;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const STAGING_PREFIX: &str = "runforge-stage-";

/// Factory for staging directories.
#[derive(Debug, Clone, Default)]
pub struct StagingArea {
    parent: Option<PathBuf>,
}

impl StagingArea {
    /// Staging directories are created under the system temp dir.
    pub fn new() -> Self {
        Self::default()
    }

    /// Staging directories are created under `parent`.
    pub fn in_dir(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
        }
    }

    /// Creates a fresh, uniquely named staging directory.
    pub fn acquire(&self) -> std::io::Result<StagingDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);

        let dir = match &self.parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        tracing::debug!(path = %dir.path().display(), "Acquired staging directory");
        Ok(StagingDir { dir })
    }

    /// Runs `f` with a fresh staging directory and removes the directory
    /// afterwards, whatever `f` returns.
    pub async fn with_staging_dir<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<std::io::Error>,
    {
        let staging = self.acquire()?;
        let result = f(staging.path().to_path_buf()).await;

        match result {
            Ok(value) => {
                staging.close()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(cleanup) = staging.close() {
                    tracing::warn!(error = %cleanup, "Failed to remove staging directory");
                }
                Err(err)
            }
        }
    }
}

/// Guard over one staging directory.
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory now, reporting any failure.
    pub fn close(self) -> std::io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(path = %path.display(), "Removed staging directory");
        Ok(())
    }
}
