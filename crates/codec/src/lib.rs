//! Binary wire format for rekal.
//!
//! A self-describing framed container (`rekal.body`) plus a four-namespace
//! string dictionary (`dict.bin`), transported together on a per-user git
//! orphan branch. The body is strictly append-only: after any export the
//! old bytes are a byte-for-byte prefix of the new bytes.

pub mod body;
pub mod dict;
pub mod error;
pub mod frame;
pub mod varint;

pub use body::{
    append_frame, frame_payload, new_body, scan_frames, write_envelope, FrameSpan, FrameType,
    BODY_HDR_SIZE, BODY_MAGIC, FRAME_ENV_SIZE,
};
pub use dict::{Dict, Namespace, DICT_HDR_SIZE, DICT_MAGIC};
pub use error::{CodecError, Result};
pub use frame::{
    from_wire_ts, tool_from_code, tool_to_code, wire_ts, CheckpointFrame, Decoder, Encoder,
    FileTouchedRecord, MetaFrame, PathArg, SessionFrame, ToolCallRecord, TurnRecord, ACTOR_AGENT,
    ACTOR_HUMAN, ROLE_ASSISTANT, ROLE_HUMAN,
};
pub use varint::{put_uvarint, read_uvarint};
