//! Frame payload codecs.
//!
//! Three payload kinds (session, checkpoint, meta) share a 4-byte magic +
//! version preamble and are zstd-compressed behind the fixed envelope.
//! All multi-byte integers are little-endian; variable integers are
//! unsigned LEB128.

use chrono::{DateTime, TimeZone, Utc};

use crate::body::{write_envelope, FrameType, FRAME_ENV_SIZE};
use crate::error::{CodecError, Result};
use crate::varint::{put_uvarint, read_uvarint};

const SESSION_MAGIC: &[u8; 4] = b"RKLS";
const CHECKPOINT_MAGIC: &[u8; 4] = b"RKLC";
const META_MAGIC: &[u8; 4] = b"RKLM";
const PAYLOAD_VERSION: u8 = 0x01;

/// Shared zstd preset dictionary. Empty means no preset dictionary is
/// compiled in; the session payload's dict-flags byte records presence so
/// readers can detect a mismatch.
pub const PRESET_DICT: &[u8] = &[];

/// Tool codes for binary encoding. Values are stable; new codes are
/// additions and an unknown code decodes to the `Unknown` sentinel.
pub mod tool_code {
    pub const WRITE: u8 = 0x00;
    pub const READ: u8 = 0x01;
    pub const BASH: u8 = 0x02;
    pub const EDIT: u8 = 0x03;
    pub const GLOB: u8 = 0x04;
    pub const GREP: u8 = 0x05;
    pub const TASK: u8 = 0x06;
    pub const NOTEBOOK_EDIT: u8 = 0x07;
    pub const UNKNOWN: u8 = 0xFF;
}

/// Map a tool name to its wire code; unknown names encode as `0xFF`.
#[must_use]
pub fn tool_to_code(name: &str) -> u8 {
    match name {
        "Write" => tool_code::WRITE,
        "Read" => tool_code::READ,
        "Bash" => tool_code::BASH,
        "Edit" => tool_code::EDIT,
        "Glob" => tool_code::GLOB,
        "Grep" => tool_code::GREP,
        "Task" => tool_code::TASK,
        "NotebookEdit" => tool_code::NOTEBOOK_EDIT,
        _ => tool_code::UNKNOWN,
    }
}

/// Map a wire code back to a tool name.
#[must_use]
pub fn tool_from_code(code: u8) -> &'static str {
    match code {
        tool_code::WRITE => "Write",
        tool_code::READ => "Read",
        tool_code::BASH => "Bash",
        tool_code::EDIT => "Edit",
        tool_code::GLOB => "Glob",
        tool_code::GREP => "Grep",
        tool_code::TASK => "Task",
        tool_code::NOTEBOOK_EDIT => "NotebookEdit",
        _ => "Unknown",
    }
}

/// Actor byte values.
pub const ACTOR_HUMAN: u8 = 0x00;
pub const ACTOR_AGENT: u8 = 0x01;

/// Role byte values.
pub const ROLE_HUMAN: u8 = 0x00;
pub const ROLE_ASSISTANT: u8 = 0x01;

/// Path argument of a tool call on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathArg {
    /// Interned in the paths namespace.
    Dict(u64),
    /// Carried inline (not worth interning).
    Inline(String),
    /// The tool took no path.
    None,
}

const PATH_DICT_REF: u8 = 0x00;
const PATH_INLINE: u8 = 0x01;
const PATH_NULL: u8 = 0x02;

/// Decoded content of a session frame (`0x01`).
#[derive(Debug, Clone, Default)]
pub struct SessionFrame {
    pub session_ref: u64,
    pub captured_at: u32,
    pub email_ref: u64,
    pub actor: u8,
    /// Only meaningful when `actor == ACTOR_AGENT`.
    pub agent_id_ref: u64,
    pub turns: Vec<TurnRecord>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// A single conversation turn on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRecord {
    pub role: u8,
    /// Seconds since the previous turn's absolute timestamp; 0 if first
    /// or if either timestamp is missing.
    pub ts_delta: u64,
    pub branch_ref: u64,
    pub text: String,
}

/// A single tool invocation on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub tool: u8,
    pub path: PathArg,
    pub cmd_prefix: String,
}

/// Decoded content of a checkpoint frame (`0x02`).
#[derive(Debug, Clone, Default)]
pub struct CheckpointFrame {
    /// 40-char hex commit hash of the host branch.
    pub git_sha: String,
    pub branch_ref: u64,
    pub email_ref: u64,
    pub timestamp: u32,
    pub actor: u8,
    pub agent_id_ref: u64,
    pub session_refs: Vec<u64>,
    pub files: Vec<FileTouchedRecord>,
}

/// A file changed in a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTouchedRecord {
    pub path_ref: u64,
    /// ASCII change kind: A, M, D, R, or T.
    pub change: u8,
}

/// Decoded content of a meta frame (`0x03`). One per export, summarizing
/// the body to that point; counts are monotonic across meta frames.
#[derive(Debug, Clone, Default)]
pub struct MetaFrame {
    pub format_version: u8,
    pub email_ref: u64,
    /// 40-char field; currently the zero placeholder on every emission.
    pub checkpoint_sha: String,
    pub timestamp: u32,
    pub n_sessions: u32,
    pub n_checkpoints: u32,
    pub n_frames: u32,
    pub n_dict_entries: u32,
}

/// Unix seconds for the wire, clamped to the u32 range.
#[must_use]
pub fn wire_ts(ts: DateTime<Utc>) -> u32 {
    u32::try_from(ts.timestamp()).unwrap_or(0)
}

/// Wire seconds back to a UTC timestamp.
#[must_use]
pub fn from_wire_ts(ts: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(ts), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Frame encoder with a shared zstd compressor.
pub struct Encoder {
    compressor: zstd::bulk::Compressor<'static>,
}

impl Encoder {
    pub fn new() -> Result<Self> {
        let compressor = if PRESET_DICT.is_empty() {
            zstd::bulk::Compressor::new(zstd::DEFAULT_COMPRESSION_LEVEL)?
        } else {
            zstd::bulk::Compressor::with_dictionary(zstd::DEFAULT_COMPRESSION_LEVEL, PRESET_DICT)?
        };
        Ok(Self { compressor })
    }

    /// Encode a session frame to envelope + compressed payload bytes.
    pub fn encode_session(&mut self, frame: &SessionFrame) -> Result<Vec<u8>> {
        let payload = encode_session_payload(frame)?;
        self.wrap(FrameType::Session, &payload)
    }

    pub fn encode_checkpoint(&mut self, frame: &CheckpointFrame) -> Result<Vec<u8>> {
        let payload = encode_checkpoint_payload(frame)?;
        self.wrap(FrameType::Checkpoint, &payload)
    }

    pub fn encode_meta(&mut self, frame: &MetaFrame) -> Result<Vec<u8>> {
        let payload = encode_meta_payload(frame);
        self.wrap(FrameType::Meta, &payload)
    }

    fn wrap(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<Vec<u8>> {
        let compressed = self.compressor.compress(payload)?;
        let env = write_envelope(frame_type, compressed.len() as u32, payload.len() as u32);
        let mut out = Vec::with_capacity(FRAME_ENV_SIZE + compressed.len());
        out.extend_from_slice(&env);
        out.extend_from_slice(&compressed);
        Ok(out)
    }
}

/// Frame decoder with a shared zstd decompressor.
pub struct Decoder {
    decompressor: zstd::bulk::Decompressor<'static>,
}

impl Decoder {
    pub fn new() -> Result<Self> {
        let decompressor = if PRESET_DICT.is_empty() {
            zstd::bulk::Decompressor::new()?
        } else {
            zstd::bulk::Decompressor::with_dictionary(PRESET_DICT)?
        };
        Ok(Self { decompressor })
    }

    pub fn decode_session(&mut self, compressed: &[u8], uncompressed_len: u32) -> Result<SessionFrame> {
        let payload = self
            .decompressor
            .decompress(compressed, uncompressed_len as usize)?;
        parse_session_payload(&payload)
    }

    pub fn decode_checkpoint(
        &mut self,
        compressed: &[u8],
        uncompressed_len: u32,
    ) -> Result<CheckpointFrame> {
        let payload = self
            .decompressor
            .decompress(compressed, uncompressed_len as usize)?;
        parse_checkpoint_payload(&payload)
    }

    pub fn decode_meta(&mut self, compressed: &[u8], uncompressed_len: u32) -> Result<MetaFrame> {
        let payload = self
            .decompressor
            .decompress(compressed, uncompressed_len as usize)?;
        parse_meta_payload(&payload)
    }

    /// Decompress a payload without interpreting it.
    pub fn decompress_raw(&mut self, compressed: &[u8], uncompressed_len: u32) -> Result<Vec<u8>> {
        Ok(self
            .decompressor
            .decompress(compressed, uncompressed_len as usize)?)
    }
}

fn encode_session_payload(frame: &SessionFrame) -> Result<Vec<u8>> {
    if frame.turns.len() > u8::MAX as usize {
        return Err(CodecError::InvalidFrame(format!(
            "too many turns: {}",
            frame.turns.len()
        )));
    }
    if frame.tool_calls.len() > u8::MAX as usize {
        return Err(CodecError::InvalidFrame(format!(
            "too many tool calls: {}",
            frame.tool_calls.len()
        )));
    }

    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(SESSION_MAGIC);
    buf.push(PAYLOAD_VERSION);
    buf.push(u8::from(!PRESET_DICT.is_empty())); // dict flags
    buf.push(frame.turns.len() as u8);
    buf.push(frame.tool_calls.len() as u8);

    put_uvarint(&mut buf, frame.session_ref);
    buf.extend_from_slice(&frame.captured_at.to_le_bytes());
    put_uvarint(&mut buf, frame.email_ref);
    buf.push(frame.actor);
    if frame.actor == ACTOR_AGENT {
        put_uvarint(&mut buf, frame.agent_id_ref);
    }

    for turn in &frame.turns {
        buf.push(turn.role);
        put_uvarint(&mut buf, turn.ts_delta);
        put_uvarint(&mut buf, turn.branch_ref);
        put_uvarint(&mut buf, turn.text.len() as u64);
        buf.extend_from_slice(turn.text.as_bytes());
    }

    for call in &frame.tool_calls {
        buf.push(call.tool);
        match &call.path {
            PathArg::Dict(path_ref) => {
                buf.push(PATH_DICT_REF);
                put_uvarint(&mut buf, *path_ref);
            }
            PathArg::Inline(path) => {
                buf.push(PATH_INLINE);
                put_uvarint(&mut buf, path.len() as u64);
                buf.extend_from_slice(path.as_bytes());
            }
            PathArg::None => buf.push(PATH_NULL),
        }
        put_uvarint(&mut buf, call.cmd_prefix.len() as u64);
        buf.extend_from_slice(call.cmd_prefix.as_bytes());
    }

    Ok(buf)
}

fn encode_checkpoint_payload(frame: &CheckpointFrame) -> Result<Vec<u8>> {
    if frame.files.len() > u8::MAX as usize {
        return Err(CodecError::InvalidFrame(format!(
            "too many files: {}",
            frame.files.len()
        )));
    }

    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(CHECKPOINT_MAGIC);
    buf.push(PAYLOAD_VERSION);
    buf.push(frame.files.len() as u8);

    buf.extend_from_slice(&sha_field(&frame.git_sha));
    put_uvarint(&mut buf, frame.branch_ref);
    put_uvarint(&mut buf, frame.email_ref);
    buf.extend_from_slice(&frame.timestamp.to_le_bytes());
    buf.push(frame.actor);
    if frame.actor == ACTOR_AGENT {
        put_uvarint(&mut buf, frame.agent_id_ref);
    }
    put_uvarint(&mut buf, frame.session_refs.len() as u64);
    for session_ref in &frame.session_refs {
        put_uvarint(&mut buf, *session_ref);
    }
    for file in &frame.files {
        put_uvarint(&mut buf, file.path_ref);
        buf.push(file.change);
    }

    Ok(buf)
}

fn encode_meta_payload(frame: &MetaFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(72);
    buf.extend_from_slice(META_MAGIC);
    buf.push(PAYLOAD_VERSION);
    buf.push(frame.format_version);
    put_uvarint(&mut buf, frame.email_ref);
    buf.extend_from_slice(&sha_field(&frame.checkpoint_sha));
    buf.extend_from_slice(&frame.timestamp.to_le_bytes());
    buf.extend_from_slice(&frame.n_sessions.to_le_bytes());
    buf.extend_from_slice(&frame.n_checkpoints.to_le_bytes());
    buf.extend_from_slice(&frame.n_frames.to_le_bytes());
    buf.extend_from_slice(&frame.n_dict_entries.to_le_bytes());
    buf
}

/// Fixed 40-byte ASCII SHA field, zero-padded when short.
fn sha_field(sha: &str) -> [u8; 40] {
    let mut field = [0u8; 40];
    let bytes = sha.as_bytes();
    let n = bytes.len().min(40);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

/// Bounds-checked forward reader over a decompressed payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], context: &'static str) -> Self {
        Self { data, pos: 0, context }
    }

    fn truncated(&self, what: &str) -> CodecError {
        CodecError::Truncated(format!("{} {what}", self.context))
    }

    fn byte(&mut self, what: &str) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.truncated(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(self.truncated(what));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32_le(&mut self, what: &str) -> Result<u32> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn uvarint(&mut self, what: &str) -> Result<u64> {
        let (value, n) =
            read_uvarint(&self.data[self.pos..]).ok_or_else(|| self.truncated(what))?;
        self.pos += n;
        Ok(value)
    }

    fn string(&mut self, len: usize, what: &str) -> Result<String> {
        let bytes = self.bytes(len, what)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Parse an already-decompressed session payload.
pub fn parse_session(data: &[u8]) -> Result<SessionFrame> {
    parse_session_payload(data)
}

fn parse_session_payload(data: &[u8]) -> Result<SessionFrame> {
    let mut r = Reader::new(data, "session");
    if r.bytes(4, "magic")? != SESSION_MAGIC {
        return Err(CodecError::BadMagic(format!("{:02x?}", &data[..4.min(data.len())])));
    }
    let _version = r.byte("version")?;
    let _dict_flags = r.byte("dict flags")?;
    let n_turns = r.byte("turn count")?;
    let n_tool_calls = r.byte("tool call count")?;

    let mut frame = SessionFrame {
        session_ref: r.uvarint("session ref")?,
        captured_at: r.u32_le("captured_at")?,
        email_ref: r.uvarint("email ref")?,
        actor: r.byte("actor")?,
        ..SessionFrame::default()
    };
    if frame.actor == ACTOR_AGENT {
        frame.agent_id_ref = r.uvarint("agent ref")?;
    }

    frame.turns.reserve(n_turns as usize);
    for _ in 0..n_turns {
        let role = r.byte("turn role")?;
        let ts_delta = r.uvarint("turn ts_delta")?;
        let branch_ref = r.uvarint("turn branch ref")?;
        let text_len = r.uvarint("turn text length")? as usize;
        let text = r.string(text_len, "turn text")?;
        frame.turns.push(TurnRecord {
            role,
            ts_delta,
            branch_ref,
            text,
        });
    }

    frame.tool_calls.reserve(n_tool_calls as usize);
    for _ in 0..n_tool_calls {
        let tool = r.byte("tool code")?;
        let path = match r.byte("path flag")? {
            PATH_DICT_REF => PathArg::Dict(r.uvarint("path ref")?),
            PATH_INLINE => {
                let len = r.uvarint("inline path length")? as usize;
                PathArg::Inline(r.string(len, "inline path")?)
            }
            PATH_NULL => PathArg::None,
            other => {
                return Err(CodecError::InvalidFrame(format!("path flag {other:#04x}")));
            }
        };
        let cmd_len = r.uvarint("cmd length")? as usize;
        let cmd_prefix = r.string(cmd_len, "cmd prefix")?;
        frame.tool_calls.push(ToolCallRecord {
            tool,
            path,
            cmd_prefix,
        });
    }

    Ok(frame)
}

fn parse_checkpoint_payload(data: &[u8]) -> Result<CheckpointFrame> {
    let mut r = Reader::new(data, "checkpoint");
    if r.bytes(4, "magic")? != CHECKPOINT_MAGIC {
        return Err(CodecError::BadMagic(format!("{:02x?}", &data[..4.min(data.len())])));
    }
    let _version = r.byte("version")?;
    let n_files = r.byte("file count")?;

    let mut frame = CheckpointFrame {
        git_sha: r.string(40, "git sha")?,
        branch_ref: r.uvarint("branch ref")?,
        email_ref: r.uvarint("email ref")?,
        timestamp: r.u32_le("ts")?,
        actor: r.byte("actor")?,
        ..CheckpointFrame::default()
    };
    if frame.actor == ACTOR_AGENT {
        frame.agent_id_ref = r.uvarint("agent ref")?;
    }

    let n_sessions = r.uvarint("session count")?;
    frame.session_refs.reserve(n_sessions as usize);
    for _ in 0..n_sessions {
        frame.session_refs.push(r.uvarint("session ref")?);
    }

    frame.files.reserve(n_files as usize);
    for _ in 0..n_files {
        let path_ref = r.uvarint("file path ref")?;
        let change = r.byte("file change kind")?;
        frame.files.push(FileTouchedRecord { path_ref, change });
    }

    Ok(frame)
}

fn parse_meta_payload(data: &[u8]) -> Result<MetaFrame> {
    let mut r = Reader::new(data, "meta");
    if r.bytes(4, "magic")? != META_MAGIC {
        return Err(CodecError::BadMagic(format!("{:02x?}", &data[..4.min(data.len())])));
    }
    let _version = r.byte("version")?;

    Ok(MetaFrame {
        format_version: r.byte("format version")?,
        email_ref: r.uvarint("email ref")?,
        checkpoint_sha: r.string(40, "checkpoint sha")?,
        timestamp: r.u32_le("ts")?,
        n_sessions: r.u32_le("n_sessions")?,
        n_checkpoints: r.u32_le("n_checkpoints")?,
        n_frames: r.u32_le("n_frames")?,
        n_dict_entries: r.u32_le("n_dict_entries")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{frame_payload, scan_frames, FRAME_ENV_SIZE};

    fn codec() -> (Encoder, Decoder) {
        (Encoder::new().unwrap(), Decoder::new().unwrap())
    }

    #[test]
    fn session_frame_roundtrip() {
        let (mut enc, mut dec) = codec();

        let frame = SessionFrame {
            session_ref: 0,
            captured_at: 1_772_000_000,
            email_ref: 0,
            actor: ACTOR_HUMAN,
            agent_id_ref: 0,
            turns: vec![
                TurnRecord {
                    role: ROLE_HUMAN,
                    ts_delta: 0,
                    branch_ref: 0,
                    text: "fix the bug in auth middleware".into(),
                },
                TurnRecord {
                    role: ROLE_ASSISTANT,
                    ts_delta: 45,
                    branch_ref: 0,
                    text: "Let me read the file first.".into(),
                },
                TurnRecord {
                    role: ROLE_HUMAN,
                    ts_delta: 120,
                    branch_ref: 0,
                    text: "looks good, thanks".into(),
                },
            ],
            tool_calls: vec![
                ToolCallRecord {
                    tool: tool_code::READ,
                    path: PathArg::Dict(0),
                    cmd_prefix: String::new(),
                },
                ToolCallRecord {
                    tool: tool_code::EDIT,
                    path: PathArg::Dict(0),
                    cmd_prefix: String::new(),
                },
                ToolCallRecord {
                    tool: tool_code::BASH,
                    path: PathArg::None,
                    cmd_prefix: "cargo test --workspace".into(),
                },
            ],
        };

        let encoded = enc.encode_session(&frame).unwrap();
        assert_eq!(encoded[0], FrameType::Session as u8);

        let uncompressed_len =
            u32::from_le_bytes([encoded[6], encoded[7], encoded[8], encoded[9]]);
        let decoded = dec
            .decode_session(&encoded[FRAME_ENV_SIZE..], uncompressed_len)
            .unwrap();

        assert_eq!(decoded.session_ref, frame.session_ref);
        assert_eq!(decoded.captured_at, frame.captured_at);
        assert_eq!(decoded.actor, ACTOR_HUMAN);
        assert_eq!(decoded.turns, frame.turns);
        assert_eq!(decoded.tool_calls, frame.tool_calls);
    }

    #[test]
    fn session_frame_with_agent() {
        let (mut enc, mut dec) = codec();

        let frame = SessionFrame {
            session_ref: 5,
            captured_at: 1_770_000_000,
            email_ref: 2,
            actor: ACTOR_AGENT,
            agent_id_ref: 3,
            turns: vec![TurnRecord {
                role: ROLE_ASSISTANT,
                ts_delta: 0,
                branch_ref: 1,
                text: "Running automated tests".into(),
            }],
            tool_calls: vec![ToolCallRecord {
                tool: tool_code::BASH,
                path: PathArg::None,
                cmd_prefix: "cargo test".into(),
            }],
        };

        let encoded = enc.encode_session(&frame).unwrap();
        let uncompressed_len =
            u32::from_le_bytes([encoded[6], encoded[7], encoded[8], encoded[9]]);
        let decoded = dec
            .decode_session(&encoded[FRAME_ENV_SIZE..], uncompressed_len)
            .unwrap();

        assert_eq!(decoded.actor, ACTOR_AGENT);
        assert_eq!(decoded.agent_id_ref, 3);
    }

    #[test]
    fn session_frame_inline_path() {
        let (mut enc, mut dec) = codec();

        let frame = SessionFrame {
            captured_at: 1_771_000_000,
            tool_calls: vec![ToolCallRecord {
                tool: tool_code::WRITE,
                path: PathArg::Inline("src/new_file.rs".into()),
                cmd_prefix: String::new(),
            }],
            ..SessionFrame::default()
        };

        let encoded = enc.encode_session(&frame).unwrap();
        let uncompressed_len =
            u32::from_le_bytes([encoded[6], encoded[7], encoded[8], encoded[9]]);
        let decoded = dec
            .decode_session(&encoded[FRAME_ENV_SIZE..], uncompressed_len)
            .unwrap();

        assert_eq!(decoded.tool_calls.len(), 1);
        assert_eq!(
            decoded.tool_calls[0].path,
            PathArg::Inline("src/new_file.rs".into())
        );
    }

    #[test]
    fn checkpoint_frame_roundtrip() {
        let (mut enc, mut dec) = codec();

        let frame = CheckpointFrame {
            git_sha: "aaa111bbb222ccc333ddd444eee555fff666aaa1".into(),
            branch_ref: 0,
            email_ref: 1,
            timestamp: 1_772_000_100,
            actor: ACTOR_HUMAN,
            agent_id_ref: 0,
            session_refs: vec![0, 1, 2],
            files: vec![
                FileTouchedRecord {
                    path_ref: 0,
                    change: b'M',
                },
                FileTouchedRecord {
                    path_ref: 1,
                    change: b'A',
                },
                FileTouchedRecord {
                    path_ref: 2,
                    change: b'T',
                },
            ],
        };

        let encoded = enc.encode_checkpoint(&frame).unwrap();
        assert_eq!(encoded[0], FrameType::Checkpoint as u8);

        let uncompressed_len =
            u32::from_le_bytes([encoded[6], encoded[7], encoded[8], encoded[9]]);
        let decoded = dec
            .decode_checkpoint(&encoded[FRAME_ENV_SIZE..], uncompressed_len)
            .unwrap();

        assert_eq!(decoded.git_sha, frame.git_sha);
        assert_eq!(decoded.session_refs, frame.session_refs);
        assert_eq!(decoded.files, frame.files);
        assert_eq!(decoded.timestamp, frame.timestamp);
    }

    #[test]
    fn meta_frame_roundtrip() {
        let (mut enc, mut dec) = codec();

        let frame = MetaFrame {
            format_version: 0x01,
            email_ref: 0,
            checkpoint_sha: "0".repeat(40),
            timestamp: 1_772_000_200,
            n_sessions: 7,
            n_checkpoints: 3,
            n_frames: 11,
            n_dict_entries: 42,
        };

        let encoded = enc.encode_meta(&frame).unwrap();
        let uncompressed_len =
            u32::from_le_bytes([encoded[6], encoded[7], encoded[8], encoded[9]]);
        let decoded = dec
            .decode_meta(&encoded[FRAME_ENV_SIZE..], uncompressed_len)
            .unwrap();

        assert_eq!(decoded.checkpoint_sha, "0".repeat(40));
        assert_eq!(decoded.n_sessions, 7);
        assert_eq!(decoded.n_checkpoints, 3);
        assert_eq!(decoded.n_frames, 11);
        assert_eq!(decoded.n_dict_entries, 42);
    }

    #[test]
    fn short_sha_is_zero_padded() {
        let (mut enc, mut dec) = codec();

        let frame = CheckpointFrame {
            git_sha: "abc123".into(),
            timestamp: 1,
            ..CheckpointFrame::default()
        };

        let encoded = enc.encode_checkpoint(&frame).unwrap();
        let uncompressed_len =
            u32::from_le_bytes([encoded[6], encoded[7], encoded[8], encoded[9]]);
        let decoded = dec
            .decode_checkpoint(&encoded[FRAME_ENV_SIZE..], uncompressed_len)
            .unwrap();

        assert_eq!(decoded.git_sha.len(), 40);
        assert!(decoded.git_sha.starts_with("abc123"));
    }

    #[test]
    fn too_many_turns_is_an_error() {
        let (mut enc, _) = codec();
        let frame = SessionFrame {
            captured_at: 1,
            turns: vec![
                TurnRecord {
                    role: ROLE_HUMAN,
                    ts_delta: 0,
                    branch_ref: 0,
                    text: "x".into(),
                };
                300
            ],
            ..SessionFrame::default()
        };
        assert!(enc.encode_session(&frame).is_err());
    }

    #[test]
    fn unknown_tool_maps_to_sentinel() {
        assert_eq!(tool_to_code("WebSearch"), tool_code::UNKNOWN);
        assert_eq!(tool_from_code(0xAB), "Unknown");
        assert_eq!(tool_from_code(tool_code::NOTEBOOK_EDIT), "NotebookEdit");
    }

    #[test]
    fn full_body_scan_and_decode() {
        let (mut enc, mut dec) = codec();
        let mut body = crate::body::new_body();

        let session = SessionFrame {
            captured_at: 1_772_000_000,
            turns: vec![TurnRecord {
                role: ROLE_HUMAN,
                ts_delta: 0,
                branch_ref: 0,
                text: "hello".into(),
            }],
            ..SessionFrame::default()
        };
        crate::body::append_frame(&mut body, &enc.encode_session(&session).unwrap());

        let checkpoint = CheckpointFrame {
            git_sha: "a".repeat(40),
            timestamp: 1_772_000_000,
            session_refs: vec![0],
            files: vec![FileTouchedRecord {
                path_ref: 0,
                change: b'M',
            }],
            ..CheckpointFrame::default()
        };
        crate::body::append_frame(&mut body, &enc.encode_checkpoint(&checkpoint).unwrap());

        let meta = MetaFrame {
            format_version: 1,
            checkpoint_sha: "0".repeat(40),
            timestamp: 1_772_000_000,
            n_sessions: 1,
            n_checkpoints: 1,
            n_frames: 3,
            n_dict_entries: 5,
            ..MetaFrame::default()
        };
        crate::body::append_frame(&mut body, &enc.encode_meta(&meta).unwrap());

        let frames = scan_frames(&body).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame_type, FrameType::Session);
        assert_eq!(frames[1].frame_type, FrameType::Checkpoint);
        assert_eq!(frames[2].frame_type, FrameType::Meta);

        let decoded = dec
            .decode_session(frame_payload(&body, &frames[0]), frames[0].uncompressed_len)
            .unwrap();
        assert_eq!(decoded.turns[0].text, "hello");

        let decoded = dec
            .decode_meta(frame_payload(&body, &frames[2]), frames[2].uncompressed_len)
            .unwrap();
        assert_eq!(decoded.n_sessions, 1);
    }
}
