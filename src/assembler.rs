//! Boot stream assembly.
//!
//! [`Assembler`] merges images from earlier boot streams with images named
//! by the caller and lays them out as a new stream:
//!
//! 1. Images from input streams are collected per type and version. A later
//!    stream replaces an earlier stream's image of the same type and version.
//! 2. Caller-supplied images are collected the same way and replace any
//!    stream image of the same type and version.
//! 3. Types are emitted in image-table order, or, in expert mode, in the
//!    order the caller first named them.
//! 4. Within a type, versions are always emitted in ascending order and
//!    linked through `next_img_ver`; the last one links to 0.
//! 5. Every image is stamped with the set of types that still have images
//!    after it ([`FollowingImages`]) and with the current minor version.
//!
//! Assembly is all-or-nothing up to the first written byte; a write error
//! part way through leaves a truncated output behind.

use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{BfbError, Result};
use crate::image::{ImageRecord, ImageSource};
use crate::image_type::ImageType;
use crate::reader::BootStreamReader;

// ── FollowingImages ──────────────────────────────────────────────────────────

/// Bitmap of image types that still have images to come.
///
/// Filled while inputs are gathered, then drained type by type as the last
/// image of each type is emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowingImages(u64);

impl FollowingImages {
    pub const EMPTY: Self = Self(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn insert(&mut self, ty: ImageType) {
        self.0 |= ty.bit();
    }

    pub fn remove(&mut self, ty: ImageType) {
        self.0 &= !ty.bit();
    }

    pub fn contains(self, ty: ImageType) -> bool {
        self.0 & ty.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Order in which image types are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmissionOrder {
    /// Image-table declaration order.
    #[default]
    Table,
    /// Order in which caller-supplied images first named each type. Only
    /// caller-supplied types are emitted, so input streams are refused.
    Expert,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub order: EmissionOrder,
}

/// What [`Assembler::write_to`] produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblySummary {
    pub images: usize,
    pub bytes:  u64,
}

// ── Assembler ────────────────────────────────────────────────────────────────

/// Images of one type keyed by version; iteration is ascending.
type VersionedImageSet = BTreeMap<u8, ImageRecord>;

#[derive(Debug, Default)]
pub struct Assembler {
    options:       BuildOptions,
    stream_images: HashMap<ImageType, VersionedImageSet>,
    source_images: HashMap<ImageType, VersionedImageSet>,
    source_order:  Vec<ImageType>,
    pending:       FollowingImages,
}

impl Assembler {
    pub fn new(options: BuildOptions) -> Self {
        Self { options, ..Self::default() }
    }

    /// Gather every image of an existing boot stream. Returns how many were read.
    pub fn add_stream<R: Read>(&mut self, reader: R) -> Result<usize> {
        if self.options.order == EmissionOrder::Expert {
            return Err(BfbError::ExpertWithInputStreams);
        }
        let mut count = 0;
        for image in BootStreamReader::new(reader) {
            let image = image?;
            let ty = image.image_type().ok_or(BfbError::UnknownImageId(image.image_id()))?;
            self.pending.insert(ty);
            let version = image.version();
            if self.stream_images.entry(ty).or_default().insert(version, image).is_some() {
                info!("{ty} v{version} from a later input stream replaces the earlier one");
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn add_stream_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let count = self.add_stream(BufReader::new(File::open(path)?))?;
        debug!("read {count} image(s) from {}", path.display());
        Ok(count)
    }

    /// Add an image from a command-line style source; `type_name` may carry
    /// a `-vN` suffix.
    pub fn add_source(&mut self, type_name: &str, source: &ImageSource) -> Result<()> {
        self.add_image(ImageRecord::from_source(source, type_name)?)
    }

    /// Add a caller-supplied image. It takes priority over any stream image
    /// of the same type and version; a later call replaces an earlier one.
    pub fn add_image(&mut self, image: ImageRecord) -> Result<()> {
        let ty = image.image_type().ok_or(BfbError::UnknownImageId(image.image_id()))?;
        self.pending.insert(ty);
        if !self.source_order.contains(&ty) {
            self.source_order.push(ty);
        }
        self.source_images.entry(ty).or_default().insert(image.version(), image);
        Ok(())
    }

    /// Types still to be emitted, as known so far.
    pub fn following_images(&self) -> FollowingImages {
        self.pending
    }

    fn emission_order(&self) -> Vec<ImageType> {
        match self.options.order {
            EmissionOrder::Table  => ImageType::all().collect(),
            EmissionOrder::Expert => self.source_order.clone(),
        }
    }

    /// Merge, order and cross-reference everything gathered so far.
    pub fn into_records(self) -> Vec<ImageRecord> {
        let order = self.emission_order();
        let Assembler { mut stream_images, mut source_images, mut pending, .. } = self;

        let mut out = Vec::new();
        for ty in order {
            let mut versions = stream_images.remove(&ty).unwrap_or_default();
            for (version, image) in source_images.remove(&ty).unwrap_or_default() {
                if versions.insert(version, image).is_some() {
                    info!("{ty} v{version}: caller-supplied image replaces the input stream's");
                }
            }

            let mut run = versions.into_values().peekable();
            while let Some(mut image) = run.next() {
                match run.peek() {
                    Some(next) => image.set_next_version(next.version()),
                    None => {
                        image.set_next_version(0);
                        pending.remove(ty);
                    }
                }
                image.set_following_images(pending.bits());
                image.stamp_current_minor();
                debug!(
                    "emit {ty} v{} -> v{} ({} bytes, following 0x{:x})",
                    image.version(),
                    image.header().next_img_ver,
                    image.header().image_len,
                    pending.bits()
                );
                out.push(image);
            }
        }
        out
    }

    /// Assemble and write the stream to `writer`.
    pub fn write_to<W: Write>(self, writer: W) -> Result<AssemblySummary> {
        write_records(&self.into_records(), writer)
    }

    /// Assemble and write the stream to a new file at `path`. The file is
    /// only created once every input has been gathered successfully.
    pub fn write_file<P: AsRef<Path>>(self, path: P) -> Result<AssemblySummary> {
        let records = self.into_records();
        let path = path.as_ref();
        let summary = write_records(&records, BufWriter::new(File::create(path)?))?;
        info!("wrote {} image(s), {} bytes to {}", summary.images, summary.bytes, path.display());
        Ok(summary)
    }
}

fn write_records<W: Write>(records: &[ImageRecord], mut writer: W) -> Result<AssemblySummary> {
    let mut summary = AssemblySummary::default();
    for record in records {
        record.write_to(&mut writer)?;
        summary.images += 1;
        summary.bytes += record.encoded_len() as u64;
    }
    writer.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(ty: &str, text: &str) -> (String, ImageSource) {
        (ty.to_owned(), ImageSource::Literal(text.to_owned()))
    }

    fn build(order: EmissionOrder, sources: &[(String, ImageSource)]) -> Vec<ImageRecord> {
        let mut asm = Assembler::new(BuildOptions { order });
        for (name, src) in sources {
            asm.add_source(name, src).unwrap();
        }
        asm.into_records()
    }

    fn stream_of(images: &[ImageRecord]) -> Vec<u8> {
        let mut out = Vec::new();
        write_records(images, &mut out).unwrap();
        out
    }

    fn types(records: &[ImageRecord]) -> Vec<ImageType> {
        records.iter().map(|r| r.image_type().unwrap()).collect()
    }

    #[test]
    fn following_images_tracks_types() {
        let mut fim = FollowingImages::EMPTY;
        fim.insert(ImageType::Bl2);
        fim.insert(ImageType::Initramfs);
        assert_eq!(fim.bits(), 1 << 1 | 1 << 63);
        assert!(fim.contains(ImageType::Bl2));
        fim.remove(ImageType::Bl2);
        assert!(!fim.contains(ImageType::Bl2));
        fim.remove(ImageType::Initramfs);
        assert!(fim.is_empty());
    }

    #[test]
    fn table_order_ignores_command_line_order() {
        let recs = build(
            EmissionOrder::Table,
            &[literal("image", "kernel"), literal("boot-args", "console=ttyAMA0")],
        );
        assert_eq!(types(&recs), vec![ImageType::BootArgs, ImageType::Image]);
    }

    #[test]
    fn expert_order_follows_command_line() {
        let recs = build(
            EmissionOrder::Expert,
            &[literal("image", "kernel"), literal("boot-args", "console=ttyAMA0")],
        );
        assert_eq!(types(&recs), vec![ImageType::Image, ImageType::BootArgs]);
    }

    #[test]
    fn expert_order_uses_first_mention_of_a_type() {
        let recs = build(
            EmissionOrder::Expert,
            &[literal("bl31-v1", "b"), literal("bl2", "a"), literal("bl31", "c")],
        );
        assert_eq!(types(&recs), vec![ImageType::Bl31, ImageType::Bl31, ImageType::Bl2]);
        assert_eq!(recs[0].version(), 0);
        assert_eq!(recs[1].version(), 1);
    }

    #[test]
    fn versions_are_chained_in_ascending_order() {
        let recs = build(
            EmissionOrder::Table,
            &[literal("bl2-v2", "two"), literal("bl2-v1", "one"), literal("bl2-v0", "zero")],
        );
        let chain: Vec<_> = recs.iter().map(|r| (r.version(), r.header().next_img_ver)).collect();
        assert_eq!(chain, vec![(0, 1), (1, 2), (2, 0)]);
    }

    #[test]
    fn bitmap_clears_after_last_image_of_a_type() {
        let recs = build(
            EmissionOrder::Table,
            &[literal("bl2-v1", "a"), literal("bl2", "b"), literal("bl31", "c"), literal("image", "d")],
        );
        let bits: Vec<_> = recs.iter().map(|r| r.header().following_images).collect();
        let bl2 = ImageType::Bl2.bit();
        let bl31 = ImageType::Bl31.bit();
        let image = ImageType::Image.bit();
        assert_eq!(bits, vec![bl2 | bl31 | image, bl31 | image, image, 0]);
    }

    #[test]
    fn later_source_of_same_version_wins() {
        let recs = build(EmissionOrder::Table, &[literal("sys", "old"), literal("sys", "new")]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].payload(), b"new");
    }

    #[test]
    fn command_line_overrides_stream_image_of_same_version() {
        let prior = build(EmissionOrder::Table, &[literal("bl31", "from-stream"), literal("bl2", "keep")]);
        let mut asm = Assembler::default();
        assert_eq!(asm.add_stream(&stream_of(&prior)[..]).unwrap(), 2);
        asm.add_source("bl31", &ImageSource::Literal("from-cli".into())).unwrap();
        assert_eq!(asm.following_images().bits(), ImageType::Bl2.bit() | ImageType::Bl31.bit());
        let recs = asm.into_records();
        assert_eq!(types(&recs), vec![ImageType::Bl2, ImageType::Bl31]);
        assert_eq!(recs[0].payload(), b"keep");
        assert_eq!(recs[1].payload(), b"from-cli");
    }

    #[test]
    fn stream_and_command_line_versions_interleave() {
        let prior = build(EmissionOrder::Table, &[literal("bl2-v1", "stream-v1")]);
        let mut asm = Assembler::default();
        asm.add_stream(&stream_of(&prior)[..]).unwrap();
        asm.add_source("bl2-v2", &ImageSource::Literal("cli-v2".into())).unwrap();
        asm.add_source("bl2", &ImageSource::Literal("cli-v0".into())).unwrap();
        let recs = asm.into_records();
        let payloads: Vec<_> = recs.iter().map(|r| r.payload().to_vec()).collect();
        assert_eq!(payloads, vec![b"cli-v0".to_vec(), b"stream-v1".to_vec(), b"cli-v2".to_vec()]);
        assert_eq!(recs[1].header().next_img_ver, 2);
    }

    #[test]
    fn later_input_stream_wins() {
        let first = build(EmissionOrder::Table, &[literal("bl33", "first"), literal("bl2", "only")]);
        let second = build(EmissionOrder::Table, &[literal("bl33", "second")]);
        let mut asm = Assembler::default();
        asm.add_stream(&stream_of(&first)[..]).unwrap();
        asm.add_stream(&stream_of(&second)[..]).unwrap();
        let recs = asm.into_records();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].payload(), b"second");
    }

    #[test]
    fn reused_images_are_upgraded_to_current_minor() {
        let old = ImageRecord::new(ImageType::Bl2, 0, b"legacy".to_vec()).unwrap();
        let mut bytes = stream_of(&[old]);
        // Rewrite as minor 1; the header has no checksum of its own.
        bytes[4] = (bytes[4] & 0x0F) | 0x10;
        let mut asm = Assembler::default();
        asm.add_stream(&bytes[..]).unwrap();
        let recs = asm.into_records();
        assert_eq!(recs[0].header().minor, crate::header::MINOR_VERSION);
    }

    #[test]
    fn expert_mode_refuses_input_streams() {
        let mut asm = Assembler::new(BuildOptions { order: EmissionOrder::Expert });
        assert!(matches!(asm.add_stream(&[][..]), Err(BfbError::ExpertWithInputStreams)));
    }

    #[test]
    fn stream_with_unknown_id_cannot_be_merged() {
        let image = ImageRecord::new(ImageType::Bl2, 0, b"x".to_vec()).unwrap();
        let mut bytes = stream_of(&[image]);
        bytes[7] = 200;
        let mut asm = Assembler::default();
        assert!(matches!(asm.add_stream(&bytes[..]), Err(BfbError::UnknownImageId(200))));
    }

    #[test]
    fn nothing_in_nothing_out() {
        let mut out = Vec::new();
        let summary = Assembler::default().write_to(&mut out).unwrap();
        assert_eq!(summary, AssemblySummary::default());
        assert!(out.is_empty());
    }

    #[test]
    fn summary_counts_padded_bytes() {
        let mut asm = Assembler::default();
        asm.add_source("sys", &ImageSource::Literal("PN12345".into())).unwrap();
        asm.add_source("boot-timeout", &ImageSource::Literal("10".into())).unwrap();
        let mut out = Vec::new();
        let summary = asm.write_to(&mut out).unwrap();
        assert_eq!(summary.images, 2);
        assert_eq!(summary.bytes, out.len() as u64);
        assert_eq!(out.len(), (24 + 8) * 2);
    }
}
