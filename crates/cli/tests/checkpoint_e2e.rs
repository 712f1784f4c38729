//! End-to-end capture and export flow against a scratch git repository:
//! init artifacts, first checkpoint shape, idempotent re-checkpoint, and
//! the append-only body across a second checkpoint.

use std::path::{Path, PathBuf};
use std::process::Command;

use rekal_cli::checkpoint::do_checkpoint;
use rekal_cli::commands::init::run_init;
use rekal_cli::export::{commit_wire_format, export_new_frames};
use rekal_cli::git;
use rekal_codec::{frame_payload, scan_frames, Decoder, Dict, FrameType, Namespace};
use rekal_core::sanitize_repo_path;
use rekal_store::DataStore;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn sh(repo: &Path, args: &[&str]) {
    let out = Command::new(args[0])
        .args(&args[1..])
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn setup_repo(dir: &Path) {
    sh(dir, &["git", "init", "-q"]);
    sh(dir, &["git", "config", "user.email", "test@rekal.dev"]);
    sh(dir, &["git", "config", "user.name", "Test User"]);
    sh(dir, &["git", "config", "commit.gpgsign", "false"]);
    std::fs::write(dir.join("login.go"), "package main\n").unwrap();
    sh(dir, &["git", "add", "."]);
    sh(dir, &["git", "commit", "-q", "-m", "fix auth bug"]);
}

fn transcript_dir(repo: &Path) -> PathBuf {
    let home = std::env::var("HOME").unwrap();
    Path::new(&home)
        .join(".claude")
        .join("projects")
        .join(sanitize_repo_path(&repo.to_string_lossy()))
}

const TRANSCRIPT_ONE: &str = concat!(
    r#"{"sessionId":"sess-auth","timestamp":"2026-02-25T10:00:00Z","type":"user","message":{"role":"user","content":"fix the auth bug in login.go"},"gitBranch":"main"}"#,
    "\n",
    r#"{"sessionId":"sess-auth","timestamp":"2026-02-25T10:00:30Z","type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Let me look at the handler."},{"type":"tool_use","name":"Read","input":{"file_path":"login.go"}}]},"gitBranch":"main"}"#,
    "\n",
    r#"{"sessionId":"sess-auth","timestamp":"2026-02-25T10:00:35Z","type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"tu1","content":"package main"}]},"gitBranch":"main"}"#,
    "\n",
    r#"{"sessionId":"sess-auth","timestamp":"2026-02-25T10:01:00Z","type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Patching the expiry check now."},{"type":"tool_use","name":"Edit","input":{"file_path":"login.go"}},{"type":"tool_use","name":"Bash","input":{"command":"go test ./..."}}]},"gitBranch":"main"}"#,
    "\n",
    r#"{"sessionId":"sess-auth","timestamp":"2026-02-25T10:02:00Z","type":"user","message":{"role":"user","content":"looks good, thanks"},"gitBranch":"main"}"#,
    "\n",
);

const TRANSCRIPT_TWO: &str = concat!(
    r#"{"sessionId":"sess-log","timestamp":"2026-02-25T12:00:00Z","type":"user","message":{"role":"user","content":"add error logging"},"gitBranch":"main"}"#,
    "\n",
    r#"{"sessionId":"sess-log","timestamp":"2026-02-25T12:00:20Z","type":"assistant","message":{"role":"assistant","content":"Added structured logging to the handler."},"gitBranch":"main"}"#,
    "\n",
);

#[test]
fn capture_export_append_only_flow() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let home = tempfile::tempdir().unwrap();
    std::env::set_var("HOME", home.path());

    let repo_dir = tempfile::tempdir().unwrap();
    let repo = repo_dir.path().canonicalize().unwrap();
    setup_repo(&repo);

    // --- init: empty artifacts ---
    run_init(&repo).unwrap();
    assert!(repo.join(".rekal/data.db").is_file());
    assert!(repo.join(".rekal/index.db").is_file());

    let branch = git::rekal_branch_name(&repo);
    assert_eq!(branch, "rekal/test@rekal.dev");

    let body = git::show_file(&repo, &branch, "rekal.body").unwrap();
    assert_eq!(body.len(), 9);
    assert_eq!(&body[..9], b"RKLBODY\x01\x00");

    let dict_raw = git::show_file(&repo, &branch, "dict.bin").unwrap();
    assert_eq!(&dict_raw[..8], b"RKDICT\x01\x00");
    let dict = Dict::load(&dict_raw).unwrap();
    assert_eq!(dict.total_entries(), 0);

    let gitignore = std::fs::read_to_string(repo.join(".gitignore")).unwrap();
    assert!(gitignore.contains(".rekal/"));

    // --- first checkpoint: shape ---
    let sessions_dir = transcript_dir(&repo);
    std::fs::create_dir_all(&sessions_dir).unwrap();
    std::fs::write(sessions_dir.join("one.jsonl"), TRANSCRIPT_ONE).unwrap();

    assert_eq!(do_checkpoint(&repo).unwrap(), 1);

    let data = DataStore::open(&repo).unwrap();
    let count = |sql: &str| data.query_json(sql).unwrap()[0]["n"].as_i64().unwrap();
    assert_eq!(count("SELECT count(*) AS n FROM sessions"), 1);
    assert_eq!(count("SELECT count(*) AS n FROM turns"), 4);
    assert_eq!(count("SELECT count(*) AS n FROM tool_calls"), 3);
    assert_eq!(count("SELECT count(*) AS n FROM checkpoints"), 1);
    assert_eq!(count("SELECT count(*) AS n FROM checkpoint_sessions"), 1);

    // --- export: 3 frames, decodable, dict counts ---
    let (body, dict_raw) = export_new_frames(&repo, &data).unwrap().unwrap();
    commit_wire_format(&repo, &body, &dict_raw).unwrap();

    let frames = scan_frames(&body).unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].frame_type, FrameType::Session);
    assert_eq!(frames[1].frame_type, FrameType::Checkpoint);
    assert_eq!(frames[2].frame_type, FrameType::Meta);

    let mut decoder = Decoder::new().unwrap();
    let session = decoder
        .decode_session(frame_payload(&body, &frames[0]), frames[0].uncompressed_len)
        .unwrap();
    assert_eq!(session.turns.len(), 4);
    assert_eq!(session.tool_calls.len(), 3);
    let codes: Vec<u8> = session.tool_calls.iter().map(|tc| tc.tool).collect();
    assert_eq!(
        codes,
        vec![
            rekal_codec::frame::tool_code::READ,
            rekal_codec::frame::tool_code::EDIT,
            rekal_codec::frame::tool_code::BASH,
        ]
    );
    // Prior-turn deltas: 30s, 30s, 60s after the opening prompt.
    let deltas: Vec<u64> = session.turns.iter().map(|t| t.ts_delta).collect();
    assert_eq!(deltas, vec![0, 30, 30, 60]);

    let checkpoint = decoder
        .decode_checkpoint(frame_payload(&body, &frames[1]), frames[1].uncompressed_len)
        .unwrap();
    assert_eq!(checkpoint.session_refs, vec![session.session_ref]);
    assert_eq!(checkpoint.git_sha.len(), 40);

    let meta = decoder
        .decode_meta(frame_payload(&body, &frames[2]), frames[2].uncompressed_len)
        .unwrap();
    assert_eq!(meta.n_frames, 3);
    assert_eq!(meta.n_checkpoints, 1);
    assert_eq!(meta.checkpoint_sha, "0".repeat(40));

    let dict = Dict::load(&dict_raw).unwrap();
    assert_eq!(dict.len(Namespace::Sessions), 1);
    assert_eq!(dict.len(Namespace::Emails), 1);

    // --- idempotent re-checkpoint ---
    assert_eq!(do_checkpoint(&repo).unwrap(), 0);
    assert!(export_new_frames(&repo, &data).unwrap().is_none());
    let body_again = git::show_file(&repo, &branch, "rekal.body").unwrap();
    assert_eq!(body_again, body);

    // --- second checkpoint grows the body append-only ---
    std::fs::write(sessions_dir.join("two.jsonl"), TRANSCRIPT_TWO).unwrap();
    std::fs::write(repo.join("logging.go"), "package main\n").unwrap();
    sh(&repo, &["git", "add", "."]);
    sh(&repo, &["git", "commit", "-q", "-m", "add error logging"]);

    assert_eq!(do_checkpoint(&repo).unwrap(), 1);
    let (body2, _dict2) = export_new_frames(&repo, &data).unwrap().unwrap();

    assert!(body2.len() > body.len());
    assert_eq!(&body2[..body.len()], &body[..], "append-only prefix violated");

    let frames2 = scan_frames(&body2).unwrap();
    assert_eq!(frames2.len(), 6);

    let meta2 = decoder
        .decode_meta(
            frame_payload(&body2, &frames2[5]),
            frames2[5].uncompressed_len,
        )
        .unwrap();
    assert!(meta2.n_frames >= meta.n_frames);
    assert_eq!(meta2.n_frames, 6);
    assert_eq!(meta2.n_sessions, 2);
}
