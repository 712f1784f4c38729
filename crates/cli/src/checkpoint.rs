//! Checkpoint engine: capture new transcript content into the data store
//! and anchor it to the current git HEAD.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use rekal_core::{find_session_dir, find_session_files, parse_transcript, WRITE_CLASS_TOOLS};
use rekal_store::DataStore;

use crate::git;

/// Capture any new transcript content. Returns the number of sessions
/// inserted; the caller suppresses output when zero.
pub fn do_checkpoint(git_root: &Path) -> Result<usize> {
    let Some(session_dir) = find_session_dir(git_root) else {
        return Ok(0);
    };
    let files = find_session_files(&session_dir).context("find session files")?;
    if files.is_empty() {
        return Ok(0);
    }

    let data = DataStore::open(git_root)?;
    let email = git::config_value(git_root, "user.email");

    let mut session_ids: Vec<String> = Vec::new();
    // Unique repo-relative paths from write-class tool calls, for the
    // supplemental files-touched rows.
    let mut tool_call_paths: BTreeSet<String> = BTreeSet::new();
    let git_root_prefix = format!("{}/", git_root.display());

    for file in &files {
        // Per-transcript failures skip the transcript, never the run.
        let Ok(metadata) = std::fs::metadata(file) else {
            continue;
        };
        let Ok(raw) = std::fs::read(file) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }

        let hash = sha256_hex(&raw);
        let file_key = file.to_string_lossy();

        // Size + hash match against the cache means nothing changed.
        if let Some((cached_size, cached_hash)) = data.get_checkpoint_state(&file_key)? {
            if cached_size == metadata.len() as i64 && cached_hash == hash {
                continue;
            }
        }

        // A different file may carry content already captured.
        if data.session_exists_by_hash(&hash)? {
            data.upsert_checkpoint_state(&file_key, metadata.len() as i64, &hash)?;
            continue;
        }

        let Ok(payload) = parse_transcript(&raw) else {
            continue;
        };
        if payload.turns.is_empty() && payload.tool_calls.is_empty() {
            continue;
        }

        let session_id = new_id();
        let captured_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        data.insert_session(
            &session_id,
            &payload.session_id,
            &hash,
            payload.actor.as_str(),
            &payload.agent_id,
            &email,
            &payload.branch,
            &captured_at,
        )?;

        for (index, turn) in payload.turns.iter().enumerate() {
            let ts = turn
                .timestamp
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default();
            data.insert_turn(
                &new_id(),
                &session_id,
                index as i64,
                turn.role.as_str(),
                &turn.content,
                &ts,
            )?;
        }

        for (order, call) in payload.tool_calls.iter().enumerate() {
            data.insert_tool_call(
                &new_id(),
                &session_id,
                order as i64,
                &call.tool,
                &call.path,
                &call.cmd_prefix,
            )?;

            if call.path.is_empty() || !WRITE_CLASS_TOOLS.contains(&call.tool.as_str()) {
                continue;
            }
            // Only paths under the git root become files-touched rows.
            if let Some(relative) = call.path.strip_prefix(&git_root_prefix) {
                tool_call_paths.insert(relative.to_owned());
            }
        }

        data.upsert_checkpoint_state(&file_key, metadata.len() as i64, &hash)?;
        session_ids.push(session_id);
    }

    if session_ids.is_empty() {
        return Ok(0);
    }

    // Anchor the new sessions to the host repository state.
    let git_sha = git::head_sha(git_root);
    let git_branch = git::current_branch(git_root);
    let changed = git::files_changed(git_root);

    let checkpoint_id = new_id();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    data.insert_checkpoint(
        &checkpoint_id,
        &git_sha,
        &git_branch,
        &email,
        &now,
        "human",
        "",
        false,
    )?;

    let mut git_touched: BTreeSet<String> = BTreeSet::new();
    for (change, path) in &changed {
        git_touched.insert(path.clone());
        data.insert_file_touched(&new_id(), &checkpoint_id, path, change)?;
    }

    // Write-class tool-call paths not already covered by the git diff.
    for path in &tool_call_paths {
        if git_touched.contains(path) {
            continue;
        }
        data.insert_file_touched(&new_id(), &checkpoint_id, path, "T")?;
    }

    for session_id in &session_ids {
        data.link_checkpoint_session(&checkpoint_id, session_id)?;
    }

    Ok(session_ids.len())
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_lowercase_64_chars() {
        let hash = sha256_hex(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
