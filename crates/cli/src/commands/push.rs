//! `rekal push`: export new checkpoints and push the orphan branch.

use std::path::Path;

use anyhow::{Context, Result};

use rekal_store::DataStore;

use crate::export::{commit_wire_format, export_new_frames};
use crate::git;
use crate::paths::ensure_init_done;

pub fn run(force: bool) -> Result<()> {
    let git_root = git::git_root()?;
    ensure_init_done(&git_root)?;
    do_push(&git_root, force)
}

/// Export + commit + push. Extracted so sync can reuse it.
pub fn do_push(git_root: &Path, force: bool) -> Result<()> {
    let branch = git::rekal_branch_name(git_root);

    if !git::ref_exists(git_root, &branch) {
        eprintln!("rekal: no data to push (run 'rekal init' first)");
        return Ok(());
    }
    if !git::has_origin(git_root) {
        eprintln!("rekal: no remote 'origin' configured, skipping push");
        return Ok(());
    }

    let data = DataStore::open(git_root)?;
    match export_new_frames(git_root, &data).context("export")? {
        Some((body, dict)) => {
            commit_wire_format(git_root, &body, &dict).context("commit to rekal branch")?;
        }
        None => eprintln!("rekal: no new checkpoints to export"),
    }
    drop(data);

    // Skip the network round-trip when the remote is already at our tip.
    let local = git::try_run(git_root, &["rev-parse", &branch]);
    let remote = git::try_run(git_root, &["rev-parse", &format!("origin/{branch}")]);
    if local.is_some() && local == remote {
        eprintln!("rekal: already up to date");
        return Ok(());
    }

    match git::push(git_root, &branch, force) {
        Ok(()) => {
            if force {
                eprintln!("rekal: force pushed to origin/{branch}");
            } else {
                eprintln!("rekal: pushed to origin/{branch}");
            }
            Ok(())
        }
        Err(output) if is_non_fast_forward(&output) => {
            eprintln!("rekal: push rejected (non-fast-forward) for origin/{branch}");
            eprintln!(
                "rekal: your remote branch has diverged from local, review and run 'rekal push --force' to overwrite remote with local data"
            );
            Ok(())
        }
        Err(output) => {
            eprintln!("rekal: push failed: {}", output.trim());
            Ok(())
        }
    }
}

fn is_non_fast_forward(output: &str) -> bool {
    output.contains("non-fast-forward")
        || output.contains("[rejected]")
        || output.contains("fetch first")
}
