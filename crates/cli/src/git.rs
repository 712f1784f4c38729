//! Git subprocess adapter.
//!
//! All repository interaction shells out to the `git` executable; errors
//! surface the first stderr line. Kept as a thin seam so the engines
//! above it stay testable against scratch repositories.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};

/// Resolve the repository root of the current working directory.
pub fn git_root() -> Result<PathBuf> {
    let out = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .context("run git")?;
    if !out.status.success() {
        bail!("not a git repository");
    }
    Ok(PathBuf::from(
        String::from_utf8_lossy(&out.stdout).trim().to_owned(),
    ))
}

/// Run git in `root` and return trimmed stdout; the first stderr line
/// becomes the error message on failure.
pub fn run(root: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .context("run git")?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let line = stderr.lines().next().unwrap_or("git failed").trim();
        bail!("git {}: {line}", args.first().copied().unwrap_or(""));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_owned())
}

/// Like [`run`], but failures are expected and mapped to `None`.
pub fn try_run(root: &Path, args: &[&str]) -> Option<String> {
    run(root, args).ok()
}

/// HEAD commit SHA; the zero SHA when the repo has no commits.
pub fn head_sha(root: &Path) -> String {
    try_run(root, &["rev-parse", "HEAD"]).unwrap_or_else(|| "0".repeat(40))
}

/// Current branch name; "unknown" when detached or unborn.
pub fn current_branch(root: &Path) -> String {
    try_run(root, &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".to_owned())
}

/// `(change_kind, path)` pairs from `git diff --name-status HEAD~1 HEAD`.
/// Empty on the first commit or on error.
pub fn files_changed(root: &Path) -> Vec<(String, String)> {
    let Some(out) = try_run(root, &["diff", "--name-status", "HEAD~1", "HEAD"]) else {
        return Vec::new();
    };
    out.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, '\t');
            let change = parts.next()?.trim();
            let path = parts.next()?.trim();
            if change.is_empty() || path.is_empty() {
                return None;
            }
            Some((change.to_owned(), path.to_owned()))
        })
        .collect()
}

/// A git config value, empty when unset.
pub fn config_value(root: &Path, key: &str) -> String {
    try_run(root, &["config", key]).unwrap_or_default()
}

/// Read a file blob from `<ref>:<path>`. `None` when the ref or path is
/// missing.
pub fn show_file(root: &Path, git_ref: &str, path: &str) -> Option<Vec<u8>> {
    let out = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["show", &format!("{git_ref}:{path}")])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    Some(out.stdout)
}

/// Write a blob into the object store and return its hash.
pub fn hash_object(root: &Path, data: &[u8]) -> Result<String> {
    run_with_stdin(root, &["hash-object", "-w", "--stdin"], data)
}

/// Build a tree object from `mktree`-formatted entries.
pub fn mktree(root: &Path, entries: &str) -> Result<String> {
    run_with_stdin(root, &["mktree"], entries.as_bytes())
}

/// Create a commit object for `tree`, optionally with a parent.
pub fn commit_tree(root: &Path, tree: &str, parent: Option<&str>, message: &str) -> Result<String> {
    let mut args = vec!["commit-tree", tree];
    if let Some(parent) = parent {
        args.push("-p");
        args.push(parent);
    }
    args.push("-m");
    args.push(message);
    run(root, &args)
}

pub fn update_ref(root: &Path, refname: &str, sha: &str) -> Result<()> {
    run(root, &["update-ref", refname, sha]).map(|_| ())
}

/// Whether a ref resolves.
pub fn ref_exists(root: &Path, git_ref: &str) -> bool {
    try_run(root, &["rev-parse", "--verify", git_ref]).is_some()
}

/// Whether a remote named origin is configured.
pub fn has_origin(root: &Path) -> bool {
    try_run(root, &["remote", "get-url", "origin"]).is_some()
}

/// Subject line of the HEAD commit, if any.
pub fn head_subject(root: &Path) -> Option<String> {
    try_run(root, &["log", "-1", "--format=%s", "HEAD"]).filter(|s| !s.is_empty())
}

/// Short ref names matching a for-each-ref pattern.
pub fn for_each_ref(root: &Path, pattern: &str) -> Vec<String> {
    let Some(out) = try_run(root, &["for-each-ref", "--format=%(refname:short)", pattern]) else {
        return Vec::new();
    };
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Push the branch with `--no-verify` so the pre-push hook does not
/// recurse. On failure the combined output is returned for the caller to
/// classify (non-fast-forward vs everything else).
pub fn push(root: &Path, branch: &str, force: bool) -> std::result::Result<(), String> {
    let mut args = vec!["push", "--no-verify"];
    if force {
        args.push("--force");
    }
    args.push("origin");
    args.push(branch);

    let out = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| err.to_string())?;
    if out.status.success() {
        return Ok(());
    }
    let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&out.stderr));
    Err(combined)
}

/// The per-user orphan branch: `rekal/<email>`, or `rekal/local` when no
/// email is configured.
pub fn rekal_branch_name(root: &Path) -> String {
    let email = config_value(root, "user.email");
    let email = email.trim();
    if email.is_empty() {
        "rekal/local".to_owned()
    } else {
        format!("rekal/{email}")
    }
}

fn run_with_stdin(root: &Path, args: &[&str], input: &[u8]) -> Result<String> {
    let mut child = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn git")?;
    child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("git stdin unavailable"))?
        .write_all(input)
        .context("write git stdin")?;
    let out = child.wait_with_output().context("wait for git")?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let line = stderr.lines().next().unwrap_or("git failed").trim();
        bail!("git {}: {line}", args.first().copied().unwrap_or(""));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_owned())
}
