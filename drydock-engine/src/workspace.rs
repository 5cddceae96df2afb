//! Run workspaces
//!
//! Each pipeline run owns a unique scratch directory holding the
//! checked-out commit. The directory is deleted when the handle drops, so
//! release happens on every exit path, including panics mid-run.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use drydock_core::Result;

const WORKSPACES_DIR: &str = "cicd-workspaces";

/// Exclusive handle on a run's scratch directory
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Creates `<root>/cicd-workspaces/<repo>-<commit_short>-<unix_ts>`
    pub fn for_run(root: &Path, repo_name: &str, commit_short: &str) -> Result<Self> {
        let name = format!(
            "{repo_name}-{commit_short}-{}",
            chrono::Utc::now().timestamp()
        );
        Self::create(root, &name)
    }

    /// Creates a rollback workspace, never reusing the failed run's path
    pub fn for_rollback(root: &Path, repo_name: &str, commit_short: &str) -> Result<Self> {
        let name = format!(
            "{repo_name}-rollback-{commit_short}-{}",
            chrono::Utc::now().timestamp()
        );
        Self::create(root, &name)
    }

    fn create(root: &Path, name: &str) -> Result<Self> {
        let path = root.join(WORKSPACES_DIR).join(name);
        std::fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "created workspace");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove workspace");
            }
        }
    }
}
