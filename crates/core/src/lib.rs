//! Core domain types and transcript parsing for rekal.
//!
//! Sessions are captured AI transcripts, content-addressed by SHA-256 of
//! the raw file; checkpoints anchor a set of sessions to a git commit.

pub mod discover;
pub mod error;
pub mod transcript;
pub mod types;

pub use discover::{find_session_dir, find_session_files, sanitize_repo_path};
pub use error::{RekalError, Result};
pub use transcript::{parse_transcript, CMD_PREFIX_MAX};
pub use types::{
    ActorKind, ChangeKind, Role, SessionPayload, ToolCall, Turn, WRITE_CLASS_TOOLS,
};
