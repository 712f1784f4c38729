//! Repository-local paths and command preconditions.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// The repo-local state directory, `.rekal/`.
#[must_use]
pub fn rekal_dir(git_root: &Path) -> PathBuf {
    git_root.join(".rekal")
}

/// Fail with a one-line cause when `init` has not been run.
pub fn ensure_init_done(git_root: &Path) -> Result<()> {
    if !rekal_dir(git_root).is_dir() {
        bail!("not initialized (run 'rekal init')");
    }
    Ok(())
}
