//! `rekal sync`: pull team context from remote rekal branches.
//!
//! Team mode rebuilds the index from local data plus every other user's
//! branch; `--self` imports the user's own remote branch into the data
//! store (for multi-machine use) and then rebuilds.

use std::path::Path;

use anyhow::{Context, Result};

use rekal_store::{DataStore, IndexStore};

use crate::checkpoint::do_checkpoint;
use crate::commands::index_cmd::{finish_index, run_index};
use crate::commands::push::do_push;
use crate::git;
use crate::import::{
    fetch_own_branch, fetch_remote_rekal_refs, import_branch, import_branch_to_index,
    list_remote_rekal_branches,
};
use crate::paths::ensure_init_done;

pub fn run(self_only: bool) -> Result<()> {
    let git_root = git::git_root()?;
    ensure_init_done(&git_root)?;

    if self_only {
        run_sync_self(&git_root)
    } else {
        run_sync_team(&git_root)
    }
}

fn run_sync_team(git_root: &Path) -> Result<()> {
    // Local capture and share first; both are best-effort here.
    match do_checkpoint(git_root) {
        Ok(count) if count > 0 => eprintln!("rekal: {count} session(s) captured"),
        Ok(_) => {}
        Err(err) => eprintln!("rekal: warning: checkpoint failed: {err:#}"),
    }
    if let Err(err) = do_push(git_root, false) {
        eprintln!("rekal: warning: push failed: {err:#}");
    }

    eprintln!("rekal: fetching remote rekal branches...");
    fetch_remote_rekal_refs(git_root);
    let remote_branches = list_remote_rekal_branches(git_root);

    let mut index = IndexStore::open(git_root)?;
    index
        .rebuild_from_data(git_root)
        .context("populate index")?;
    let local_sessions = index.session_count()?;

    let mut remote_sessions = 0usize;
    let mut team_members = 0usize;
    for branch in &remote_branches {
        eprintln!("rekal: importing {branch}...");
        match import_branch_to_index(git_root, &index, branch) {
            Ok(count) => {
                if count > 0 {
                    remote_sessions += count;
                    team_members += 1;
                }
            }
            // A broken branch never stops the sync.
            Err(err) => eprintln!("rekal: warning: import {branch} failed: {err:#}"),
        }
    }

    finish_index(&index)?;

    if remote_sessions > 0 {
        eprintln!(
            "rekal: synced, {local_sessions} local session(s), {remote_sessions} remote session(s) from {team_members} team member(s)"
        );
    } else {
        eprintln!("rekal: synced, {local_sessions} local session(s)");
    }
    Ok(())
}

fn run_sync_self(git_root: &Path) -> Result<()> {
    eprintln!("rekal: fetching your remote branch...");
    let remote_branch = fetch_own_branch(git_root)?;

    let data = DataStore::open(git_root)?;
    let imported = import_branch(git_root, &data, &remote_branch)
        .with_context(|| format!("import from {remote_branch}"))?;
    drop(data);
    eprintln!("rekal: imported {imported} session(s) from {remote_branch}");

    run_index(git_root)
}
