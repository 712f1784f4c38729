//! Bare `rekal <query> [filters...]`: hybrid or filter search over the
//! index store.

use anyhow::Result;

use rekal_search::{run_search, RecallFilters};
use rekal_store::IndexStore;

use crate::commands::index_cmd::run_index;
use crate::git;
use crate::paths::ensure_init_done;

pub fn run(filters: RecallFilters) -> Result<()> {
    let git_root = git::git_root()?;
    ensure_init_done(&git_root)?;

    let mut index = IndexStore::open(&git_root)?;
    if !index.is_populated() {
        eprintln!("rekal: index not built, rebuilding...");
        drop(index);
        run_index(&git_root)?;
        index = IndexStore::open(&git_root)?;
    }

    let output = run_search(&index, &filters)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
