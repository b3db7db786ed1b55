//! Table of contents and payload extraction for existing boot streams.

use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::assembler::FollowingImages;
use crate::error::Result;
use crate::image::ImageRecord;
use crate::image_type::ImageType;
use crate::reader::BootStreamReader;

pub const DEFAULT_EXTRACT_PREFIX: &str = "dump-";

/// What to do with each image of a dumped stream.
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Print a table of contents.
    pub list:           bool,
    /// Print every header field instead of length and description.
    pub verbose:        bool,
    /// Print the table of contents as JSON.
    pub json:           bool,
    /// Write each payload to `<prefix><name>`.
    pub extract_prefix: Option<String>,
}

/// Display name and description of one image.
///
/// Unknown IDs get a synthetic `image_id_N` name. When the header carries
/// version fields, both strings gain the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLabel {
    pub name:        String,
    pub description: String,
}

impl ImageLabel {
    pub fn for_record(record: &ImageRecord) -> Self {
        let id = record.image_id();
        let (mut name, mut description) = match ImageType::from_id(id) {
            Some(ty) => (ty.name().to_owned(), ty.description().to_owned()),
            None     => (format!("image_id_{id}"), format!("Unknown image type, ID {id}")),
        };
        if record.header().has_version_fields() {
            let version = record.version();
            name.push_str(&format!("-v{version}"));
            description.push_str(&format!(" (version {version})"));
        }
        Self { name, description }
    }
}

/// Machine-readable description of one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub name:             String,
    pub description:      String,
    pub image_id:         u8,
    pub format_version:   String,
    pub version:          Option<u8>,
    pub next_version:     Option<u8>,
    pub length:           u32,
    pub crc:              String,
    pub following_images: Vec<&'static str>,
}

pub fn summarize(record: &ImageRecord) -> ImageSummary {
    let header = record.header();
    let label = ImageLabel::for_record(record);
    let following = FollowingImages::from_bits(header.following_images);
    let versioned = header.has_version_fields();
    ImageSummary {
        name:             label.name,
        description:      label.description,
        image_id:         header.image_id,
        format_version:   format!("{}.{}", header.major, header.minor),
        version:          versioned.then_some(header.cur_img_ver),
        next_version:     versioned.then_some(header.next_img_ver),
        length:           header.image_len,
        crc:              format!("0x{:08x}", header.image_crc),
        following_images: ImageType::all()
            .filter(|ty| following.contains(*ty))
            .map(ImageType::name)
            .collect(),
    }
}

/// One table-of-contents line: the header dump when `verbose`, otherwise
/// the payload length and description.
pub fn list_line(record: &ImageRecord, verbose: bool) -> String {
    if verbose {
        record.header().to_string()
    } else {
        format!("{:>10} {}", record.header().image_len, ImageLabel::for_record(record).description)
    }
}

/// Write one image's payload, without header or padding, to
/// `<prefix><name>`. Returns the path written.
pub fn extract_image(record: &ImageRecord, prefix: &str) -> io::Result<PathBuf> {
    let path = PathBuf::from(format!("{prefix}{}", ImageLabel::for_record(record).name));
    File::create(&path)?.write_all(record.payload())?;
    info!("extracted {} bytes to {}", record.payload().len(), path.display());
    Ok(path)
}

/// Walk a boot stream, listing and/or extracting each image as it is read.
///
/// Text listings are written per image, so a corrupt image still leaves the
/// lines for the images before it. Returns the number of images processed.
pub fn dump_stream<R: Read, W: Write>(reader: R, mut out: W, opts: &DumpOptions) -> Result<usize> {
    let mut reader = BootStreamReader::new(reader);
    let mut summaries = Vec::new();
    while let Some(record) = reader.next_image()? {
        if opts.list {
            if opts.json {
                summaries.push(summarize(&record));
            } else {
                writeln!(out, "{}", list_line(&record, opts.verbose))?;
            }
        }
        if let Some(prefix) = &opts.extract_prefix {
            extract_image(&record, prefix)?;
        }
    }
    if opts.list && opts.json {
        serde_json::to_writer_pretty(&mut out, &summaries).map_err(io::Error::from)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(reader.images_read())
}
