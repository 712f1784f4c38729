//! Import engines: decode a branch's body/dict pair into the data store
//! (self-sync) or directly into the index store (team-sync).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Result};
use chrono::SecondsFormat;
use tracing::warn;

use rekal_codec::{
    frame_payload, from_wire_ts, scan_frames, tool_from_code, Decoder, Dict, FrameType, Namespace,
    PathArg, ACTOR_AGENT, ROLE_ASSISTANT,
};
use rekal_store::{DataStore, IndexStore};

use crate::checkpoint::{new_id, sha256_hex};
use crate::git;

/// Decode a branch into the data store. Sessions dedup on session id,
/// checkpoints on git SHA; imported checkpoints are marked exported so
/// they are never re-emitted onto this user's branch. Returns the number
/// of sessions inserted.
pub fn import_branch(git_root: &Path, data: &DataStore, branch: &str) -> Result<usize> {
    let Some((body, dict)) = load_wire(git_root, branch) else {
        return Ok(0);
    };
    let frames = scan_frames(&body)?;
    let mut decoder = Decoder::new()?;

    let mut imported = 0usize;
    for span in &frames {
        let compressed = frame_payload(&body, span);
        match span.frame_type {
            FrameType::Session => {
                // The raw transcript is not transported; the decompressed
                // payload stands in as the content-hash source.
                let payload = match decoder.decompress_raw(compressed, span.uncompressed_len) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!("skip session frame: {err}");
                        continue;
                    }
                };
                let frame = match rekal_codec::frame::parse_session(&payload) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("skip session frame: {err}");
                        continue;
                    }
                };

                let Ok(session_id) = dict.get(Namespace::Sessions, frame.session_ref) else {
                    continue;
                };
                if data.session_exists_by_id(session_id)? {
                    continue;
                }

                let email = dict.get(Namespace::Emails, frame.email_ref).unwrap_or("");
                let (actor, agent_id) = if frame.actor == ACTOR_AGENT {
                    let agent = dict
                        .get(Namespace::Emails, frame.agent_id_ref)
                        .unwrap_or("");
                    ("agent", agent)
                } else {
                    ("human", "")
                };
                let branch_name = frame
                    .turns
                    .first()
                    .and_then(|turn| dict.get(Namespace::Branches, turn.branch_ref).ok())
                    .unwrap_or("");
                let captured_at =
                    from_wire_ts(frame.captured_at).to_rfc3339_opts(SecondsFormat::Secs, true);

                data.insert_session(
                    session_id,
                    "",
                    &sha256_hex(&payload),
                    actor,
                    agent_id,
                    email,
                    branch_name,
                    &captured_at,
                )?;

                for (index, turn) in frame.turns.iter().enumerate() {
                    let role = if turn.role == ROLE_ASSISTANT {
                        "assistant"
                    } else {
                        "human"
                    };
                    data.insert_turn(&new_id(), session_id, index as i64, role, &turn.text, "")?;
                }

                for (order, call) in frame.tool_calls.iter().enumerate() {
                    let path = match &call.path {
                        PathArg::Dict(path_ref) => {
                            dict.get(Namespace::Paths, *path_ref).unwrap_or("")
                        }
                        PathArg::Inline(path) => path.as_str(),
                        PathArg::None => "",
                    };
                    data.insert_tool_call(
                        &new_id(),
                        session_id,
                        order as i64,
                        tool_from_code(call.tool),
                        path,
                        &call.cmd_prefix,
                    )?;
                }

                imported += 1;
            }
            FrameType::Checkpoint => {
                let frame = match decoder.decode_checkpoint(compressed, span.uncompressed_len) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("skip checkpoint frame: {err}");
                        continue;
                    }
                };
                if data.checkpoint_exists_by_sha(&frame.git_sha)? {
                    continue;
                }

                let branch_name = dict
                    .get(Namespace::Branches, frame.branch_ref)
                    .unwrap_or("unknown");
                let email = dict.get(Namespace::Emails, frame.email_ref).unwrap_or("");
                let (actor, agent_id) = if frame.actor == ACTOR_AGENT {
                    let agent = dict
                        .get(Namespace::Emails, frame.agent_id_ref)
                        .unwrap_or("");
                    ("agent", agent)
                } else {
                    ("human", "")
                };
                let ts = from_wire_ts(frame.timestamp).to_rfc3339_opts(SecondsFormat::Secs, true);

                // Exported up front: this data is already on the branch.
                let checkpoint_id = new_id();
                data.insert_checkpoint(
                    &checkpoint_id,
                    &frame.git_sha,
                    branch_name,
                    email,
                    &ts,
                    actor,
                    agent_id,
                    true,
                )?;

                for file in &frame.files {
                    let Ok(path) = dict.get(Namespace::Paths, file.path_ref) else {
                        continue;
                    };
                    data.insert_file_touched(
                        &new_id(),
                        &checkpoint_id,
                        path,
                        &(file.change as char).to_string(),
                    )?;
                }

                for session_ref in &frame.session_refs {
                    let Ok(session_id) = dict.get(Namespace::Sessions, *session_ref) else {
                        continue;
                    };
                    if data.session_exists_by_id(session_id)? {
                        data.link_checkpoint_session(&checkpoint_id, session_id)?;
                    }
                }
            }
            FrameType::Meta => {}
        }
    }

    Ok(imported)
}

/// Decode another user's branch straight into the index store. Tool
/// calls are skipped; facets start with zero tool-call counts and are
/// back-filled with checkpoint info. Returns the number of sessions
/// imported.
pub fn import_branch_to_index(git_root: &Path, index: &IndexStore, branch: &str) -> Result<usize> {
    let Some((body, dict)) = load_wire(git_root, branch) else {
        return Ok(0);
    };
    let frames = scan_frames(&body)?;
    let mut decoder = Decoder::new()?;

    struct CheckpointInfo {
        checkpoint_id: String,
        git_sha: String,
        file_count: i64,
    }
    let mut session_checkpoints: HashMap<String, CheckpointInfo> = HashMap::new();

    let mut imported = 0usize;
    for span in &frames {
        let compressed = frame_payload(&body, span);
        match span.frame_type {
            FrameType::Session => {
                let frame = match decoder.decode_session(compressed, span.uncompressed_len) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("skip session frame: {err}");
                        continue;
                    }
                };
                let Ok(session_id) = dict.get(Namespace::Sessions, frame.session_ref) else {
                    continue;
                };

                let email = dict.get(Namespace::Emails, frame.email_ref).unwrap_or("");
                let actor = if frame.actor == ACTOR_AGENT {
                    "agent"
                } else {
                    "human"
                };
                let branch_name = frame
                    .turns
                    .first()
                    .and_then(|turn| dict.get(Namespace::Branches, turn.branch_ref).ok())
                    .unwrap_or("");
                let captured_at =
                    from_wire_ts(frame.captured_at).to_rfc3339_opts(SecondsFormat::Secs, true);

                for (turn_index, turn) in frame.turns.iter().enumerate() {
                    let role = if turn.role == ROLE_ASSISTANT {
                        "assistant"
                    } else {
                        "human"
                    };
                    index.insert_turn_ft(
                        &new_id(),
                        session_id,
                        turn_index as i64,
                        role,
                        &turn.text,
                        "",
                    )?;
                }

                index.insert_session_facet(
                    session_id,
                    email,
                    branch_name,
                    actor,
                    "",
                    &captured_at,
                    frame.turns.len() as i64,
                    0,
                    0,
                )?;
                imported += 1;
            }
            FrameType::Checkpoint => {
                let frame = match decoder.decode_checkpoint(compressed, span.uncompressed_len) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("skip checkpoint frame: {err}");
                        continue;
                    }
                };
                // No checkpoint id travels on the wire; allocate one that
                // is stable for this rebuild of the derived store.
                let checkpoint_id = new_id();

                for session_ref in &frame.session_refs {
                    let Ok(session_id) = dict.get(Namespace::Sessions, *session_ref) else {
                        continue;
                    };
                    for file in &frame.files {
                        let Ok(path) = dict.get(Namespace::Paths, file.path_ref) else {
                            continue;
                        };
                        index.insert_files_index(
                            &checkpoint_id,
                            session_id,
                            path,
                            &(file.change as char).to_string(),
                        )?;
                    }
                    session_checkpoints.insert(
                        session_id.to_owned(),
                        CheckpointInfo {
                            checkpoint_id: checkpoint_id.clone(),
                            git_sha: frame.git_sha.clone(),
                            file_count: frame.files.len() as i64,
                        },
                    );
                }
            }
            FrameType::Meta => {}
        }
    }

    for (session_id, info) in &session_checkpoints {
        index.update_facet_checkpoint(
            session_id,
            &info.checkpoint_id,
            &info.git_sha,
            info.file_count,
        )?;
    }

    Ok(imported)
}

/// Read and validate the body/dict pair from a branch. `None` when the
/// branch carries no data yet.
fn load_wire(git_root: &Path, branch: &str) -> Option<(Vec<u8>, Dict)> {
    let body = git::show_file(git_root, branch, "rekal.body")?;
    if body.len() <= rekal_codec::BODY_HDR_SIZE {
        return None;
    }
    let dict_raw = git::show_file(git_root, branch, "dict.bin")?;
    if dict_raw.is_empty() {
        return None;
    }
    match Dict::load(&dict_raw) {
        Ok(dict) => Some((body, dict)),
        Err(err) => {
            warn!("bad dict on {branch}: {err}");
            None
        }
    }
}

/// Fetch all remote rekal refs. Non-fatal: missing remote or a failed
/// fetch leaves local state untouched.
pub fn fetch_remote_rekal_refs(git_root: &Path) {
    if !git::has_origin(git_root) {
        return;
    }
    let _ = git::try_run(
        git_root,
        &[
            "fetch",
            "origin",
            "refs/heads/rekal/*:refs/remotes/origin/rekal/*",
        ],
    );
}

/// Remote rekal branch refs, excluding the current user's own branch.
pub fn list_remote_rekal_branches(git_root: &Path) -> Vec<String> {
    let own = format!("origin/{}", git::rekal_branch_name(git_root));
    git::for_each_ref(git_root, "refs/remotes/origin/rekal/")
        .into_iter()
        .filter(|branch| *branch != own)
        .collect()
}

/// `sync --self` exists solely to pull the user's own remote branch, so
/// a missing remote is fatal here (unlike team sync).
pub fn fetch_own_branch(git_root: &Path) -> Result<String> {
    if !git::has_origin(git_root) {
        bail!("no remote 'origin' configured");
    }
    let branch = git::rekal_branch_name(git_root);
    git::run(git_root, &["fetch", "origin", &branch])?;
    Ok(format!("origin/{branch}"))
}
