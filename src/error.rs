use std::io;
use thiserror::Error;

use crate::header::HeaderError;

pub type Result<T> = std::result::Result<T, BfbError>;

/// Everything that can abort reading or building a boot stream.
///
/// Reaching the end of a stream is not an error; readers report it as
/// `Ok(None)`.
#[derive(Error, Debug)]
pub enum BfbError {
    #[error("{0}")]
    BadHeader(#[from] HeaderError),
    #[error("image ID {image_id}: stream corrupted, {kind}")]
    StreamCorrupt { image_id: u8, kind: Corruption },
    #[error("unknown image type '{0}'")]
    UnknownImageType(String),
    #[error("image ID {0} is not in the image type table")]
    UnknownImageId(u8),
    #[error("image '{name}': version {version} does not fit the 4-bit version field")]
    InvalidVersion { name: String, version: String },
    #[error("image of {0} bytes exceeds the 32-bit length field")]
    ImageTooLarge(usize),
    #[error("expert ordering cannot be combined with input boot streams")]
    ExpertWithInputStreams,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("image too short ({actual} of {expected} bytes)")]
    ImageTooShort { expected: u32, actual: usize },
    #[error("header CRC of 0x{stored:08x} does not match calculated CRC of 0x{computed:08x}")]
    CrcMismatch { stored: u32, computed: u32 },
}
