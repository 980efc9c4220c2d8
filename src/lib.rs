//! A library for reading and writing ZIP archives, including ZIP64.
//!
//! The writer emits archives strictly front to back: sizes and checksums
//! travel in data descriptors behind each member, so output can go to a
//! pipe or socket as well as a file. The reader locates the central
//! directory at the tail of a seekable stream and decompresses members
//! on demand.
//!
//! Stored (uncompressed) and deflated members are supported; encryption
//! and multi-disk archives are not.
//!
//! ```
//! use std::io::Cursor;
//! use zipstream::{FileOptions, ZipArchive, ZipWriter};
//!
//! # fn main() -> zipstream::ZipResult<()> {
//! let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
//! writer.add_bytes("hello.txt", "Hello, World!", FileOptions::default())?;
//! writer.finish()?;
//!
//! let mut archive = ZipArchive::new(writer.into_inner()?)?;
//! let mut contents = Vec::new();
//! archive.by_name("hello.txt")?.extract(&mut contents)?;
//! assert_eq!(contents, b"Hello, World!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub use crate::compression::CompressionMethod;
pub use crate::extra_field::ExtraField;
pub use crate::read::{ZipArchive, ZipFile};
pub use crate::result::{ZipError, ZipResult};
pub use crate::types::{DateTime, Version, ZipEntry};
pub use crate::write::{FileOptions, ZipWriter};

pub mod compression;
pub mod extra_field;
pub mod read;
pub mod result;
pub mod types;
pub mod write;

mod crc32;
mod spec;

/// Chunk size used by the compression and extraction pipelines.
pub(crate) const BUFFER_SIZE: usize = 8 * 1024;
