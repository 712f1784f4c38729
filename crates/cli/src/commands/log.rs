//! `rekal log`: recent checkpoints, newest first.

use anyhow::Result;

use rekal_store::DataStore;

use crate::git;
use crate::paths::ensure_init_done;

pub fn run(limit: i64) -> Result<()> {
    let git_root = git::git_root()?;
    ensure_init_done(&git_root)?;

    let data = DataStore::open(&git_root)?;
    for entry in data.checkpoint_log(limit)? {
        println!("checkpoint {}", entry.id);
        println!("Date:     {}", entry.ts);
        println!("Commit:   {}", entry.git_sha);
        println!("Branch:   {}", entry.git_branch);
        println!("Author:   {}", entry.user_email);
        println!("Sessions: {}", entry.session_count);
        println!();
    }
    Ok(())
}
