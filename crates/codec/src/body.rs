//! Append-only body container.
//!
//! A body is a 9-byte file header followed by a sequence of framed
//! envelopes. Appends never rewrite prior bytes: after any export the
//! prefix up to the pre-export length is byte-identical.

use crate::error::{CodecError, Result};

/// Body file magic.
pub const BODY_MAGIC: &[u8; 7] = b"RKLBODY";
const BODY_VERSION: u8 = 0x01;
/// Magic + version + 1 reserved byte.
pub const BODY_HDR_SIZE: usize = 9;

/// Fixed frame envelope size: type + version + compressed len + uncompressed len.
pub const FRAME_ENV_SIZE: usize = 10;
const ENVELOPE_VERSION: u8 = 0x01;

/// Frame type tags. A discriminated union, not a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Session = 0x01,
    Checkpoint = 0x02,
    Meta = 0x03,
}

impl FrameType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Session),
            0x02 => Some(Self::Checkpoint),
            0x03 => Some(Self::Meta),
            _ => None,
        }
    }
}

/// Offset and lengths of one frame found by [`scan_frames`].
#[derive(Debug, Clone, Copy)]
pub struct FrameSpan {
    /// Byte offset of the envelope within the body.
    pub offset: usize,
    pub frame_type: FrameType,
    pub compressed_len: u32,
    pub uncompressed_len: u32,
}

/// A fresh body: header only, no frames.
#[must_use]
pub fn new_body() -> Vec<u8> {
    let mut body = Vec::with_capacity(BODY_HDR_SIZE);
    body.extend_from_slice(BODY_MAGIC);
    body.push(BODY_VERSION);
    body.push(0x00); // reserved
    body
}

/// Build the 10-byte envelope for a frame.
#[must_use]
pub fn write_envelope(frame_type: FrameType, compressed_len: u32, uncompressed_len: u32) -> [u8; FRAME_ENV_SIZE] {
    let mut env = [0u8; FRAME_ENV_SIZE];
    env[0] = frame_type as u8;
    env[1] = ENVELOPE_VERSION;
    env[2..6].copy_from_slice(&compressed_len.to_le_bytes());
    env[6..10].copy_from_slice(&uncompressed_len.to_le_bytes());
    env
}

/// Append a fully encoded frame (envelope + compressed payload).
pub fn append_frame(body: &mut Vec<u8>, frame: &[u8]) {
    body.extend_from_slice(frame);
}

/// Strict forward scan over a body.
///
/// Fails fast on a bad header, truncated trailing bytes, an unknown frame
/// type, or a zero uncompressed length.
pub fn scan_frames(body: &[u8]) -> Result<Vec<FrameSpan>> {
    if body.len() < BODY_HDR_SIZE {
        return Err(CodecError::Truncated("body header".into()));
    }
    if &body[0..7] != BODY_MAGIC {
        return Err(CodecError::BadMagic(format!("{:02x?}", &body[0..7])));
    }

    let mut frames = Vec::new();
    let mut pos = BODY_HDR_SIZE;

    while pos < body.len() {
        if pos + FRAME_ENV_SIZE > body.len() {
            return Err(CodecError::Truncated(format!("envelope at offset {pos}")));
        }
        let frame_type = FrameType::from_byte(body[pos]).ok_or_else(|| {
            CodecError::InvalidFrame(format!("unknown type {:#04x} at offset {pos}", body[pos]))
        })?;
        let compressed_len = u32::from_le_bytes([
            body[pos + 2],
            body[pos + 3],
            body[pos + 4],
            body[pos + 5],
        ]);
        let uncompressed_len = u32::from_le_bytes([
            body[pos + 6],
            body[pos + 7],
            body[pos + 8],
            body[pos + 9],
        ]);
        if uncompressed_len == 0 {
            return Err(CodecError::InvalidFrame(format!(
                "zero uncompressed length at offset {pos}"
            )));
        }
        if pos + FRAME_ENV_SIZE + compressed_len as usize > body.len() {
            return Err(CodecError::Truncated(format!("payload at offset {pos}")));
        }

        frames.push(FrameSpan {
            offset: pos,
            frame_type,
            compressed_len,
            uncompressed_len,
        });
        pos += FRAME_ENV_SIZE + compressed_len as usize;
    }

    Ok(frames)
}

/// The compressed payload bytes of a scanned frame.
#[must_use]
pub fn frame_payload<'a>(body: &'a [u8], span: &FrameSpan) -> &'a [u8] {
    let start = span.offset + FRAME_ENV_SIZE;
    &body[start..start + span.compressed_len as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_body_is_nine_header_bytes() {
        let body = new_body();
        assert_eq!(body.len(), BODY_HDR_SIZE);
        assert_eq!(&body[0..7], b"RKLBODY");
        assert_eq!(body[7], 0x01);
        assert_eq!(body[8], 0x00);
    }

    #[test]
    fn scan_empty_body() {
        let frames = scan_frames(&new_body()).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn scan_rejects_bad_magic() {
        assert!(matches!(
            scan_frames(b"BADMAGIC\x00"),
            Err(CodecError::BadMagic(_))
        ));
    }

    #[test]
    fn scan_rejects_truncated_payload() {
        let mut body = new_body();
        let env = write_envelope(FrameType::Session, 100, 200);
        body.extend_from_slice(&env);
        body.extend_from_slice(&[0u8; 10]); // 10 < 100 advertised bytes
        assert!(matches!(scan_frames(&body), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn scan_rejects_unknown_type() {
        let mut body = new_body();
        body.push(0x7f);
        body.extend_from_slice(&[0x01, 0, 0, 0, 0, 1, 0, 0, 0]);
        assert!(matches!(
            scan_frames(&body),
            Err(CodecError::InvalidFrame(_))
        ));
    }

    #[test]
    fn scan_rejects_zero_uncompressed_len() {
        let mut body = new_body();
        let env = write_envelope(FrameType::Meta, 0, 0);
        body.extend_from_slice(&env);
        assert!(matches!(
            scan_frames(&body),
            Err(CodecError::InvalidFrame(_))
        ));
    }

    #[test]
    fn scan_walks_multiple_frames() {
        let mut body = new_body();

        let payload_a = [0xaau8; 5];
        let env_a = write_envelope(FrameType::Session, payload_a.len() as u32, 50);
        body.extend_from_slice(&env_a);
        body.extend_from_slice(&payload_a);

        let payload_b = [0xbbu8; 3];
        let env_b = write_envelope(FrameType::Checkpoint, payload_b.len() as u32, 30);
        body.extend_from_slice(&env_b);
        body.extend_from_slice(&payload_b);

        let frames = scan_frames(&body).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame_type, FrameType::Session);
        assert_eq!(frames[0].offset, BODY_HDR_SIZE);
        assert_eq!(frames[1].frame_type, FrameType::Checkpoint);
        assert_eq!(frame_payload(&body, &frames[0]), &payload_a);
        assert_eq!(frame_payload(&body, &frames[1]), &payload_b);
    }

    #[test]
    fn append_preserves_prefix() {
        let mut body = new_body();
        let payload = [0x11u8; 4];
        let env = write_envelope(FrameType::Session, 4, 40);
        body.extend_from_slice(&env);
        body.extend_from_slice(&payload);

        let snapshot = body.clone();

        let env2 = write_envelope(FrameType::Meta, 4, 40);
        let mut frame2 = env2.to_vec();
        frame2.extend_from_slice(&[0x22u8; 4]);
        append_frame(&mut body, &frame2);

        assert_eq!(&body[..snapshot.len()], snapshot.as_slice());
    }
}
