//! Sequential boot stream reader.
//!
//! A boot stream has no index: images are found by reading one header,
//! skipping its payload and padding, and repeating until the stream ends
//! exactly on an image boundary. Any malformed or corrupt image stops the
//! read; images returned before it remain valid.

use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::Result;
use crate::image::ImageRecord;

pub struct BootStreamReader<R: Read> {
    reader:      R,
    images_read: usize,
    finished:    bool,
}

impl BootStreamReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        debug!("opening boot stream {}", path.display());
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> BootStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, images_read: 0, finished: false }
    }

    /// Next image, or `Ok(None)` once the stream is exhausted. After an
    /// error or the end of stream every further call returns `Ok(None)`.
    pub fn next_image(&mut self) -> Result<Option<ImageRecord>> {
        if self.finished {
            return Ok(None);
        }
        match ImageRecord::read_from(&mut self.reader) {
            Ok(Some(image)) => {
                self.images_read += 1;
                Ok(Some(image))
            }
            Ok(None) => {
                debug!("end of boot stream after {} image(s)", self.images_read);
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Drain the stream.
    pub fn read_all(mut self) -> Result<Vec<ImageRecord>> {
        let mut images = Vec::new();
        while let Some(image) = self.next_image()? {
            images.push(image);
        }
        Ok(images)
    }

    pub fn images_read(&self) -> usize {
        self.images_read
    }
}

impl<R: Read> Iterator for BootStreamReader<R> {
    type Item = Result<ImageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_image().transpose()
    }
}
