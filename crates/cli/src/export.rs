//! Export engine: encode unexported checkpoints into the append-only
//! wire format and commit the body/dict pair onto the user's orphan
//! branch.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use rekal_codec::{
    append_frame, new_body, scan_frames, wire_ts, CheckpointFrame, Dict, Encoder,
    FileTouchedRecord, MetaFrame, Namespace, PathArg, SessionFrame, ToolCallRecord, TurnRecord,
    ACTOR_AGENT, ACTOR_HUMAN, ROLE_ASSISTANT, ROLE_HUMAN,
};
use rekal_store::DataStore;

use crate::git;

/// Encode all unexported checkpoints and return the updated body + dict
/// bytes. `None` when there is nothing to export.
///
/// Frames are appended in checkpoint-timestamp order, sessions within a
/// checkpoint in data-store iteration order, with a single meta frame
/// last. Prior body bytes are never rewritten.
pub fn export_new_frames(git_root: &Path, data: &DataStore) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let checkpoints = data.unexported_checkpoints()?;
    if checkpoints.is_empty() {
        return Ok(None);
    }

    // Start from the wire format already on the orphan branch so new
    // frames extend the existing byte prefix.
    let branch = git::rekal_branch_name(git_root);
    let mut body = git::show_file(git_root, &branch, "rekal.body").unwrap_or_else(new_body);
    if body.is_empty() {
        body = new_body();
    }
    let mut dict = match git::show_file(git_root, &branch, "dict.bin") {
        Some(raw) if !raw.is_empty() => Dict::load(&raw).unwrap_or_default(),
        _ => Dict::new(),
    };

    let mut encoder = Encoder::new().context("create frame encoder")?;
    let mut exported_ids: Vec<String> = Vec::new();

    for checkpoint in &checkpoints {
        let session_ids = data.sessions_for_checkpoint(&checkpoint.id)?;
        let mut session_refs: Vec<u64> = Vec::with_capacity(session_ids.len());

        for session_id in &session_ids {
            let Some(session) = data.session(session_id)? else {
                continue;
            };
            let turns = data.turns(session_id)?;
            let tool_calls = data.tool_calls(session_id)?;

            let session_ref = dict.lookup_or_add(Namespace::Sessions, &session.id);
            let email_ref = dict.lookup_or_add(Namespace::Emails, &session.user_email);
            let branch_ref = if session.branch.is_empty() {
                0
            } else {
                dict.lookup_or_add(Namespace::Branches, &session.branch)
            };

            let (actor, agent_id_ref) = if session.actor_type == "agent" {
                let agent_ref = if session.agent_id.is_empty() {
                    0
                } else {
                    dict.lookup_or_add(Namespace::Emails, &session.agent_id)
                };
                (ACTOR_AGENT, agent_ref)
            } else {
                (ACTOR_HUMAN, 0)
            };

            let mut frame = SessionFrame {
                session_ref,
                captured_at: parse_ts(&session.captured_at),
                email_ref,
                actor,
                agent_id_ref,
                ..SessionFrame::default()
            };

            // Per-turn delta against the immediately prior turn's
            // timestamp; zero when either side is missing.
            let mut prev_ts: Option<DateTime<Utc>> = None;
            for turn in &turns {
                let role = if turn.role == "assistant" {
                    ROLE_ASSISTANT
                } else {
                    ROLE_HUMAN
                };
                let mut ts_delta = 0u64;
                if let Ok(ts) = DateTime::parse_from_rfc3339(&turn.ts) {
                    let ts = ts.with_timezone(&Utc);
                    if let Some(prev) = prev_ts {
                        let delta = ts.signed_duration_since(prev).num_seconds();
                        if delta > 0 {
                            ts_delta = delta as u64;
                        }
                    }
                    prev_ts = Some(ts);
                }
                frame.turns.push(TurnRecord {
                    role,
                    ts_delta,
                    branch_ref,
                    text: turn.content.clone(),
                });
            }

            for call in &tool_calls {
                let path = if call.path.is_empty() {
                    PathArg::None
                } else {
                    PathArg::Dict(dict.lookup_or_add(Namespace::Paths, &call.path))
                };
                frame.tool_calls.push(ToolCallRecord {
                    tool: rekal_codec::tool_to_code(&call.tool),
                    path,
                    cmd_prefix: call.cmd_prefix.clone(),
                });
            }

            append_frame(&mut body, &encoder.encode_session(&frame)?);
            session_refs.push(session_ref);
        }

        let branch_ref = dict.lookup_or_add(Namespace::Branches, &checkpoint.git_branch);
        let email_ref = dict.lookup_or_add(Namespace::Emails, &checkpoint.user_email);
        let (actor, agent_id_ref) = if checkpoint.actor_type == "agent" {
            let agent_ref = if checkpoint.agent_id.is_empty() {
                0
            } else {
                dict.lookup_or_add(Namespace::Emails, &checkpoint.agent_id)
            };
            (ACTOR_AGENT, agent_ref)
        } else {
            (ACTOR_HUMAN, 0)
        };

        let files = data
            .files_touched(&checkpoint.id)?
            .into_iter()
            .map(|(path, change)| FileTouchedRecord {
                path_ref: dict.lookup_or_add(Namespace::Paths, &path),
                change: change.bytes().next().unwrap_or(b'M'),
            })
            .collect();

        let frame = CheckpointFrame {
            git_sha: checkpoint.git_sha.clone(),
            branch_ref,
            email_ref,
            timestamp: parse_ts(&checkpoint.ts),
            actor,
            agent_id_ref,
            session_refs,
            files,
        };
        append_frame(&mut body, &encoder.encode_checkpoint(&frame)?);
        exported_ids.push(checkpoint.id.clone());
    }

    // One meta frame per export, counting itself.
    let frame_count = scan_frames(&body).context("scan body before meta")?.len() as u32;
    let email = git::config_value(git_root, "user.email");
    let meta = MetaFrame {
        format_version: 0x01,
        email_ref: dict.lookup_or_add(Namespace::Emails, &email),
        checkpoint_sha: "0".repeat(40),
        timestamp: wire_ts(Utc::now()),
        n_sessions: dict.len(Namespace::Sessions) as u32,
        n_checkpoints: exported_ids.len() as u32,
        n_frames: frame_count + 1,
        n_dict_entries: dict.total_entries() as u32,
    };
    append_frame(&mut body, &encoder.encode_meta(&meta)?);

    // The exported flag flips only after the full append succeeded.
    data.mark_exported(&exported_ids)?;

    let dict_bytes = dict.encode().context("encode dict")?;
    Ok(Some((body, dict_bytes)))
}

/// Commit `rekal.body` and `dict.bin` onto the orphan branch and return
/// the new commit SHA.
pub fn commit_wire_format(git_root: &Path, body: &[u8], dict: &[u8]) -> Result<String> {
    let branch = git::rekal_branch_name(git_root);

    let parent = git::try_run(git_root, &["rev-parse", &branch])
        .with_context(|| format!("resolve branch {branch}"))?;

    let body_hash = git::hash_object(git_root, body).context("hash rekal.body")?;
    let dict_hash = git::hash_object(git_root, dict).context("hash dict.bin")?;

    let tree_entries =
        format!("100644 blob {dict_hash}\tdict.bin\n100644 blob {body_hash}\trekal.body\n");
    let tree = git::mktree(git_root, &tree_entries).context("mktree")?;

    // Reuse the host HEAD's subject so the branch history reads like the
    // repo's own.
    let message = git::head_subject(git_root).unwrap_or_else(|| "rekal: checkpoint".to_owned());

    let commit = git::commit_tree(git_root, &tree, Some(&parent), &message).context("commit-tree")?;
    git::update_ref(git_root, &format!("refs/heads/{branch}"), &commit).context("update-ref")?;
    Ok(commit)
}

fn parse_ts(raw: &str) -> u32 {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| wire_ts(ts.with_timezone(&Utc)))
        .unwrap_or(0)
}
