//! One boot stream image: header, payload and zero padding.
//!
//! On disk every payload is padded with 0..=7 zero bytes so that the next
//! header starts on an 8-byte boundary. The header's CRC32 covers the
//! payload followed by that padding; the length field excludes it.

use crc32fast::Hasher;
use log::debug;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::error::{BfbError, Corruption, Result};
use crate::header::{ImageHeader, HEADER_LEN, MINOR_VERSION};
use crate::image_type::ImageType;

static ZERO_PAD: [u8; 8] = [0; 8];

/// Number of zero bytes that follow a payload of `len` bytes.
#[inline]
pub fn padding_len(len: usize) -> usize {
    (8 - len % 8) % 8
}

/// CRC32 of `payload` followed by its zero padding.
pub fn image_crc(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.update(&ZERO_PAD[..padding_len(payload.len())]);
    hasher.finalize()
}

// ── ImageSource ──────────────────────────────────────────────────────────────

/// Where a caller-supplied image comes from: a file whose whole contents
/// become the payload, or a literal string written as `=text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    Literal(String),
}

impl ImageSource {
    pub fn load(&self) -> io::Result<Vec<u8>> {
        match self {
            ImageSource::File(path)    => fs::read(path),
            ImageSource::Literal(text) => Ok(text.as_bytes().to_vec()),
        }
    }
}

impl From<&str> for ImageSource {
    fn from(spec: &str) -> Self {
        match spec.strip_prefix('=') {
            Some(text) => ImageSource::Literal(text.to_owned()),
            None       => ImageSource::File(PathBuf::from(spec)),
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::File(path)    => write!(f, "{}", path.display()),
            ImageSource::Literal(text) => write!(f, "={text}"),
        }
    }
}

// ── ImageRecord ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    header:  ImageHeader,
    payload: Vec<u8>,
}

impl ImageRecord {
    /// Wrap `payload` in a fresh header for an image of type `ty`.
    pub fn new(ty: ImageType, version: u8, payload: Vec<u8>) -> Result<Self> {
        let image_len = u32::try_from(payload.len())
            .map_err(|_| BfbError::ImageTooLarge(payload.len()))?;
        let header = ImageHeader::new(ty.id(), version, image_len, image_crc(&payload));
        Ok(Self { header, payload })
    }

    /// Build an image from a command-line style source.
    ///
    /// `type_name` is a table name optionally suffixed with `-vN`. The name
    /// is resolved before the source is read, so an unknown type never
    /// touches the file system.
    pub fn from_source(source: &ImageSource, type_name: &str) -> Result<Self> {
        let (ty, version) = ImageType::parse_versioned(type_name)?;
        let record = Self::new(ty, version, source.load()?)?;
        debug!(
            "loaded {ty} v{version} from {source}: {} bytes, crc 0x{:08x}",
            record.header.image_len, record.header.image_crc
        );
        Ok(record)
    }

    /// Read the next image from `reader`.
    ///
    /// Returns `Ok(None)` when the reader is already at end of stream. On
    /// error the reader's position is unspecified.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut raw = Vec::with_capacity(HEADER_LEN);
        reader.by_ref().take(HEADER_LEN as u64).read_to_end(&mut raw)?;
        if raw.is_empty() {
            return Ok(None);
        }
        let header = ImageHeader::decode(&raw)?;

        // No preallocation: a corrupt length field must not trigger a
        // multi-gigabyte allocation before the short read is noticed.
        let mut payload = Vec::new();
        reader.by_ref().take(u64::from(header.image_len)).read_to_end(&mut payload)?;
        if payload.len() != header.image_len as usize {
            return Err(BfbError::StreamCorrupt {
                image_id: header.image_id,
                kind:     Corruption::ImageTooShort {
                    expected: header.image_len,
                    actual:   payload.len(),
                },
            });
        }

        let mut padding = Vec::with_capacity(ZERO_PAD.len());
        reader.by_ref().take(padding_len(payload.len()) as u64).read_to_end(&mut padding)?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        hasher.update(&padding);
        let computed = hasher.finalize();
        if computed != header.image_crc {
            return Err(BfbError::StreamCorrupt {
                image_id: header.image_id,
                kind:     Corruption::CrcMismatch { stored: header.image_crc, computed },
            });
        }

        debug!(
            "read image ID {} v{}: {} bytes, crc 0x{:08x}",
            header.image_id, header.cur_img_ver, header.image_len, header.image_crc
        );
        Ok(Some(Self { header, payload }))
    }

    /// Write header, payload and padding.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.header.encode())?;
        writer.write_all(&self.payload)?;
        writer.write_all(self.padding())
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn image_id(&self) -> u8 {
        self.header.image_id
    }

    /// `None` when the stream carried an ID this build does not know.
    pub fn image_type(&self) -> Option<ImageType> {
        ImageType::from_id(self.header.image_id)
    }

    pub fn version(&self) -> u8 {
        self.header.cur_img_ver
    }

    pub fn padding(&self) -> &'static [u8] {
        &ZERO_PAD[..padding_len(self.payload.len())]
    }

    /// Bytes this image occupies in a stream.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + padding_len(self.payload.len())
    }

    pub(crate) fn set_next_version(&mut self, version: u8) {
        self.header.next_img_ver = version;
    }

    pub(crate) fn set_following_images(&mut self, bits: u64) {
        self.header.following_images = bits;
    }

    /// Images reused from an older stream are rewritten at the current minor.
    pub(crate) fn stamp_current_minor(&mut self) {
        self.header.minor = MINOR_VERSION;
    }
}
