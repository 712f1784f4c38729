//! `rekal index`: drop and rebuild the derived index store.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};

use rekal_search::{Model, DEFAULT_DIMENSION};
use rekal_store::IndexStore;

use crate::git;
use crate::paths::ensure_init_done;

pub fn run() -> Result<()> {
    let git_root = git::git_root()?;
    ensure_init_done(&git_root)?;
    run_index(&git_root)
}

/// Full rebuild: repopulate from the data store, rebuild the FTS index,
/// run the LSA pass, and record the index state. Shared by `index`,
/// `sync --self`, and recall's auto-rebuild.
pub fn run_index(git_root: &Path) -> Result<()> {
    let mut index = IndexStore::open(git_root)?;

    eprintln!("rekal: rebuilding index from data store...");
    index
        .rebuild_from_data(git_root)
        .context("populate index")?;

    finish_index(&index)?;

    let sessions = index.session_count()?;
    let turns = index.turn_count()?;
    eprintln!("rekal: index rebuilt, {sessions} session(s), {turns} turn(s)");
    Ok(())
}

/// The tail of every rebuild, after any team imports have landed: FTS,
/// embeddings, and the state record.
pub fn finish_index(index: &IndexStore) -> Result<()> {
    let sessions = index.session_count()?;
    let turns = index.turn_count()?;

    if turns > 0 {
        index.rebuild_fts().context("build fts index")?;
    }

    let mut embedding_dim = 0usize;
    if sessions >= 2 {
        let content = index.session_content().context("query session content")?;
        if let Some(model) = Model::build(&content, DEFAULT_DIMENSION) {
            for (session_id, vector) in model.vectors() {
                index
                    .store_embedding(&session_id, &vector, "lsa-v1")
                    .context("store embeddings")?;
            }
            embedding_dim = model.dim();
        }
    }

    index.write_state("session_count", &sessions.to_string())?;
    index.write_state("turn_count", &turns.to_string())?;
    index.write_state("embedding_dim", &embedding_dim.to_string())?;
    index.write_state(
        "last_indexed_at",
        &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    )?;
    Ok(())
}
