//! Boot stream image header codec.
//!
//! Every image in a boot stream is preceded by a fixed 24-byte header made
//! of three little-endian 64-bit words:
//!
//! | Word | Bits   | Field |
//! |------|--------|-------|
//! | 0    | 0..32  | magic (`0x13026642`) |
//! | 0    | 32..36 | major version |
//! | 0    | 36..40 | minor version |
//! | 0    | 44..48 | version of the next image of the same type (0 = none) |
//! | 0    | 48..52 | version of this image |
//! | 0    | 52..56 | header length / 8 |
//! | 0    | 56..64 | image type ID |
//! | 1    | 0..32  | payload length, excluding padding |
//! | 1    | 32..64 | CRC32 of payload followed by padding |
//! | 2    | 0..64  | bitmap of image type IDs occurring later in the stream |
//!
//! Bits 40..44 of word 0 are reserved and always written as zero.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use thiserror::Error;

/// Magic number in the low half of word 0 ("Bf^B^S").
pub const MAGIC: u32 = 0x1302_6642;
pub const MAJOR_VERSION: u8 = 1;
/// Highest minor revision this implementation reads, and the one it writes.
pub const MINOR_VERSION: u8 = 2;
/// Minor revision that introduced the image version fields.
pub const VERSION_FIELDS_MINOR: u8 = 2;
/// Header length in bytes; always a multiple of 8.
pub const HEADER_LEN: usize = 24;
/// Largest value the 4-bit image version fields can hold.
pub const MAX_IMAGE_VERSION: u8 = 0xF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("image header too short ({0} of 24 bytes)")]
    TooShort(usize),
    #[error("bad image header magic number 0x{0:x}")]
    BadMagic(u32),
    #[error("bad image header major version {0}")]
    BadMajor(u8),
    #[error("bad image header minor version {0}")]
    BadMinor(u8),
    #[error("bad image header length field {0}")]
    BadLength(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub major:            u8,
    pub minor:            u8,
    pub next_img_ver:     u8,
    pub cur_img_ver:      u8,
    pub image_id:         u8,
    pub image_len:        u32,
    pub image_crc:        u32,
    pub following_images: u64,
}

impl Default for ImageHeader {
    fn default() -> Self {
        Self {
            major:            MAJOR_VERSION,
            minor:            MINOR_VERSION,
            next_img_ver:     0,
            cur_img_ver:      0,
            image_id:         0,
            image_len:        0,
            image_crc:        0,
            following_images: 0,
        }
    }
}

impl ImageHeader {
    /// Header for a freshly built image. Chaining fields start at zero and
    /// are filled in when the image is placed in a stream.
    pub fn new(image_id: u8, cur_img_ver: u8, image_len: u32, image_crc: u32) -> Self {
        Self {
            image_id,
            cur_img_ver,
            image_len,
            image_crc,
            ..Self::default()
        }
    }

    /// Whether this header's minor revision carries meaningful version fields.
    pub fn has_version_fields(&self) -> bool {
        self.minor >= VERSION_FIELDS_MINOR
    }

    /// Pack into the on-disk layout. Fields wider than their bit slot are
    /// truncated to fit.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let w0 = u64::from(MAGIC)
            | u64::from(self.major & 0xF) << 32
            | u64::from(self.minor & 0xF) << 36
            | u64::from(self.next_img_ver & 0xF) << 44
            | u64::from(self.cur_img_ver & 0xF) << 48
            | ((HEADER_LEN / 8) as u64 & 0xF) << 52
            | u64::from(self.image_id) << 56;
        let w1 = u64::from(self.image_len) | u64::from(self.image_crc) << 32;
        let w2 = self.following_images;

        let mut out = [0u8; HEADER_LEN];
        LittleEndian::write_u64_into(&[w0, w1, w2], &mut out);
        out
    }

    /// Unpack and validate a header. Only the first `HEADER_LEN` bytes of
    /// `bytes` are looked at.
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::TooShort(bytes.len()));
        }
        let mut words = [0u64; 3];
        LittleEndian::read_u64_into(&bytes[..HEADER_LEN], &mut words);
        let [w0, w1, w2] = words;

        let magic  = (w0 & 0xFFFF_FFFF) as u32;
        let major  = ((w0 >> 32) & 0xF) as u8;
        let minor  = ((w0 >> 36) & 0xF) as u8;
        let length = ((w0 >> 52) & 0xF) as u8;

        if magic != MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        if major != MAJOR_VERSION {
            return Err(HeaderError::BadMajor(major));
        }
        if minor > MINOR_VERSION {
            return Err(HeaderError::BadMinor(minor));
        }
        if usize::from(length) != HEADER_LEN / 8 {
            return Err(HeaderError::BadLength(length));
        }

        // Every accepted minor is <= VERSION_FIELDS_MINOR, so the version
        // nibbles are always taken as-is; older writers leave them zero.
        let (next_img_ver, cur_img_ver) = if minor <= VERSION_FIELDS_MINOR {
            (((w0 >> 44) & 0xF) as u8, ((w0 >> 48) & 0xF) as u8)
        } else {
            (0, 0)
        };

        Ok(Self {
            major,
            minor,
            next_img_ver,
            cur_img_ver,
            image_id:         (w0 >> 56) as u8,
            image_len:        (w1 & 0xFFFF_FFFF) as u32,
            image_crc:        (w1 >> 32) as u32,
            following_images: w2,
        })
    }
}

/// Single-line dump of every header field, as shown by `mkbfb -d -v`.
impl fmt::Display for ImageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ver: {}.{} Len: {} ID: {} ImLen: {} ImCRC: 0x{:x} FolIm: 0x{:x}",
            self.major, self.minor, HEADER_LEN, self.image_id,
            self.image_len, self.image_crc, self.following_images,
        )?;
        if self.has_version_fields() {
            write!(f, " NxImVr: {} ImVr: {}", self.next_img_ver, self.cur_img_ver)?;
        }
        Ok(())
    }
}
