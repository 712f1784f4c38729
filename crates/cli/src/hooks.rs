//! Git hook installation and removal, plus .gitignore maintenance.
//!
//! Hooks are tagged with a marker comment so `clean` removes only hooks
//! rekal wrote; a pre-existing foreign hook is never overwritten.

use std::path::Path;

use anyhow::{Context, Result};

pub const HOOK_MARKER: &str = "# managed by rekal";

/// Install the post-commit and pre-push hooks.
pub fn install_hooks(git_root: &Path) -> Result<()> {
    let hooks_dir = git_root.join(".git").join("hooks");
    std::fs::create_dir_all(&hooks_dir).context("create hooks dir")?;

    write_hook(&hooks_dir.join("post-commit"), &hook_script("checkpoint"))
        .context("post-commit hook")?;
    write_hook(&hooks_dir.join("pre-push"), &hook_script("push")).context("pre-push hook")?;
    Ok(())
}

/// Remove hooks carrying the marker. Idempotent; foreign hooks are left
/// alone.
pub fn remove_hooks(git_root: &Path) {
    let hooks_dir = git_root.join(".git").join("hooks");
    for name in ["post-commit", "pre-push"] {
        let path = hooks_dir.join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            if content.contains(HOOK_MARKER) {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// A shell hook that resolves the binary at runtime: PATH first, then the
/// default install location.
fn hook_script(subcommand: &str) -> String {
    format!(
        "#!/bin/sh\n{HOOK_MARKER}\nif command -v rekal >/dev/null 2>&1; then\n  rekal {subcommand}\nelif [ -x \"$HOME/.local/bin/rekal\" ]; then\n  \"$HOME/.local/bin/rekal\" {subcommand}\nfi\n"
    )
}

fn write_hook(path: &Path, content: &str) -> Result<()> {
    // An existing hook without our marker is not ours to replace.
    if let Ok(existing) = std::fs::read_to_string(path) {
        if !existing.contains(HOOK_MARKER) {
            return Ok(());
        }
    }
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Add an entry to `.gitignore` unless already present.
pub fn append_gitignore_entry(git_root: &Path, entry: &str) -> Result<()> {
    let path = git_root.join(".gitignore");
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).context("read .gitignore"),
    };

    if content.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    let mut updated = content;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    std::fs::write(&path, updated).context("write .gitignore")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gitignore_entry_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        append_gitignore_entry(dir.path(), ".rekal/").unwrap();
        append_gitignore_entry(dir.path(), ".rekal/").unwrap();

        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content.matches(".rekal/").count(), 1);
    }

    #[test]
    fn gitignore_appends_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target").unwrap();
        append_gitignore_entry(dir.path(), ".rekal/").unwrap();

        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target\n.rekal/\n");
    }

    #[test]
    fn foreign_hook_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = dir.path().join(".git").join("hooks");
        std::fs::create_dir_all(&hooks).unwrap();
        std::fs::write(hooks.join("post-commit"), "#!/bin/sh\necho mine\n").unwrap();

        install_hooks(dir.path()).unwrap();
        let content = std::fs::read_to_string(hooks.join("post-commit")).unwrap();
        assert!(content.contains("echo mine"));
        assert!(!content.contains(HOOK_MARKER));

        // pre-push did not exist, so it was installed.
        let pre_push = std::fs::read_to_string(hooks.join("pre-push")).unwrap();
        assert!(pre_push.contains(HOOK_MARKER));

        remove_hooks(dir.path());
        assert!(hooks.join("post-commit").exists());
        assert!(!hooks.join("pre-push").exists());
    }
}
