//! `rekal checkpoint`: capture the current session after a commit.

use anyhow::Result;

use crate::checkpoint::do_checkpoint;
use crate::git;
use crate::paths::ensure_init_done;

pub fn run() -> Result<()> {
    let git_root = git::git_root()?;
    ensure_init_done(&git_root)?;

    let inserted = do_checkpoint(&git_root)?;
    if inserted > 0 {
        eprintln!("rekal: {inserted} session(s) captured");
    }
    Ok(())
}
