//! `rekal init`: set up the repo-local stores, hooks, and orphan branch.

use std::path::Path;

use anyhow::{Context, Result};

use rekal_codec::{new_body, Dict};
use rekal_store::{DataStore, IndexStore};

use crate::checkpoint::do_checkpoint;
use crate::git;
use crate::hooks::{append_gitignore_entry, install_hooks};
use crate::import::import_branch;
use crate::paths::rekal_dir;

pub fn run() -> Result<()> {
    let git_root = git::git_root()?;
    run_init(&git_root)
}

/// Initialize rekal in `git_root`. Idempotent: a second run reports and
/// exits cleanly.
pub fn run_init(git_root: &Path) -> Result<()> {
    let rekal_dir = rekal_dir(git_root);
    if rekal_dir.is_dir() {
        println!("rekal is already initialized (run 'rekal clean' first to reinitialize)");
        return Ok(());
    }

    std::fs::create_dir_all(&rekal_dir).context("create .rekal/")?;

    // Opening either store creates it with its schema.
    drop(DataStore::open(git_root)?);
    drop(IndexStore::open(git_root)?);

    append_gitignore_entry(git_root, ".rekal/").context("update .gitignore")?;
    install_hooks(git_root).context("install hooks")?;
    ensure_orphan_branch(git_root).context("create rekal branch")?;

    // A remote branch may already carry data from another machine.
    let branch = git::rekal_branch_name(git_root);
    if let Some(body) = git::show_file(git_root, &branch, "rekal.body") {
        if body.len() > rekal_codec::BODY_HDR_SIZE {
            let data = DataStore::open(git_root)?;
            match import_branch(git_root, &data, &branch) {
                Ok(count) if count > 0 => {
                    eprintln!("rekal: imported {count} session(s) from remote");
                }
                Ok(_) => {}
                Err(err) => eprintln!("rekal: import error: {err:#}"),
            }
        }
    }

    // Capture anything already sitting in the transcript directory.
    match do_checkpoint(git_root) {
        Ok(count) if count > 0 => eprintln!("rekal: {count} session(s) captured"),
        Ok(_) => {}
        Err(err) => eprintln!("rekal: warning: initial checkpoint failed: {err:#}"),
    }

    println!("rekal initialized");
    Ok(())
}

/// Create or adopt the `rekal/<email>` orphan branch: keep a local
/// branch as-is, prefer an existing remote branch, otherwise create a
/// fresh orphan with an empty body and dict.
fn ensure_orphan_branch(git_root: &Path) -> Result<()> {
    let branch = git::rekal_branch_name(git_root);
    if git::ref_exists(git_root, &branch) {
        return Ok(());
    }

    if git::has_origin(git_root) {
        let _ = git::try_run(git_root, &["fetch", "origin", &branch]);
        let remote_branch = format!("origin/{branch}");
        if git::ref_exists(git_root, &remote_branch) {
            git::run(git_root, &["branch", &branch, &remote_branch])?;
            return Ok(());
        }
    }

    let body = new_body();
    let dict = Dict::new().encode().context("encode empty dict")?;

    let body_hash = git::hash_object(git_root, &body).context("hash rekal.body")?;
    let dict_hash = git::hash_object(git_root, &dict).context("hash dict.bin")?;

    let tree_entries =
        format!("100644 blob {dict_hash}\tdict.bin\n100644 blob {body_hash}\trekal.body\n");
    let tree = git::mktree(git_root, &tree_entries).context("mktree")?;
    let commit = git::commit_tree(git_root, &tree, None, "rekal: initialize checkpoint branch")
        .context("create initial commit")?;
    git::update_ref(git_root, &format!("refs/heads/{branch}"), &commit)
}
