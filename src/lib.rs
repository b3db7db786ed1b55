pub mod header;
pub mod image_type;
pub mod image;
pub mod reader;
pub mod assembler;
pub mod dump;
pub mod error;

pub use header::{ImageHeader, HeaderError, HEADER_LEN, MAGIC, MAJOR_VERSION, MINOR_VERSION};
pub use image_type::ImageType;
pub use image::{ImageRecord, ImageSource, padding_len, image_crc};
pub use reader::BootStreamReader;
pub use assembler::{Assembler, AssemblySummary, BuildOptions, EmissionOrder, FollowingImages};
pub use dump::{DumpOptions, ImageLabel, dump_stream};
pub use error::{BfbError, Corruption, Result};
