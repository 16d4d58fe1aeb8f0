//! Shared working directory for one workflow run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// The single directory holding every artifact of a run plus the current
/// candidate script. Created on acquire, torn down only by an explicit
/// [`Workspace::release`] call from the owner — never from a destructor, so a
/// crash leaves the directory behind for inspection.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the workspace directory if absent (idempotent) and take
    /// ownership of it.
    pub fn acquire(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create workspace {}", root.display()))?;
        debug!(root = %root.display(), "workspace acquired");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an artifact name relative to the workspace.
    pub fn resolve(&self, artifact: &str) -> PathBuf {
        self.root.join(artifact)
    }

    /// Overwrite the candidate script with `source` and return its path.
    pub fn write_script(&self, filename: &str, source: &str) -> Result<PathBuf> {
        let path = self.resolve(filename);
        fs::write(&path, source).with_context(|| format!("write script {}", path.display()))?;
        Ok(path)
    }

    /// Recursively delete the workspace, suppressing errors. Consumes the
    /// workspace; the owner calls this exactly once after the run resolves.
    pub fn release(self) {
        if let Err(err) = fs::remove_dir_all(&self.root) {
            warn!(root = %self.root.display(), err = %err, "workspace release failed");
        } else {
            debug!(root = %self.root.display(), "workspace released");
        }
    }
}
