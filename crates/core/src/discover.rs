//! Discovery of the AI host's transcript directory for a repository.

use std::path::{Path, PathBuf};

/// Replicate the host's project-path sanitization: every non-alphanumeric
/// code point becomes a dash.
///
/// e.g. `/Users/frank/projects/rekal` → `-Users-frank-projects-rekal`
#[must_use]
pub fn sanitize_repo_path(repo_path: &str) -> String {
    repo_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Transcript directory for a repo: `$HOME/.claude/projects/<sanitized>/`.
#[must_use]
pub fn find_session_dir(repo_path: &Path) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    let sanitized = sanitize_repo_path(&repo_path.to_string_lossy());
    Some(home.join(".claude").join("projects").join(sanitized))
}

/// All `.jsonl` transcript files directly inside `session_dir`.
/// A missing directory yields an empty list.
pub fn find_session_files(session_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(session_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
