use std::result::Result as StdResult;

use thiserror::Error;

/// Errors from the wire format codec.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CodecError {
    /// Magic bytes did not match.
    #[error("bad magic: {0}")]
    BadMagic(String),

    /// Input ended before a complete structure.
    #[error("truncated input at {0}")]
    Truncated(String),

    /// A frame carried an unknown type byte or a zero uncompressed length.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Dictionary reference out of range.
    #[error("dictionary index {index} out of range for {namespace}")]
    DictIndex { namespace: &'static str, index: u64 },

    /// Dictionary entry exceeds the u16 length limit.
    #[error("dictionary entry too long: {0} bytes")]
    EntryTooLong(usize),

    /// zstd compression or decompression failed.
    #[error("zstd: {0}")]
    Zstd(#[from] std::io::Error),
}

pub type Result<T> = StdResult<T, CodecError>;
