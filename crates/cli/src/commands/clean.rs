//! `rekal clean`: remove repo-local state and marker-tagged hooks.

use std::path::Path;

use anyhow::{Context, Result};

use crate::git;
use crate::hooks::remove_hooks;
use crate::paths::rekal_dir;

pub fn run() -> Result<()> {
    let git_root = git::git_root()?;
    run_clean(&git_root)?;
    println!("rekal cleaned (run 'rekal init' to reinitialize)");
    Ok(())
}

/// Remove `.rekal/` and marker-tagged hooks. Idempotent.
pub fn run_clean(git_root: &Path) -> Result<()> {
    match std::fs::remove_dir_all(rekal_dir(git_root)) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).context("remove .rekal/"),
    }
    remove_hooks(git_root);
    Ok(())
}
