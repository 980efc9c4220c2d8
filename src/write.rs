//! Types for creating ZIP archives

use std::cmp;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::compression::CompressionMethod;
use crate::crc32::Crc32;
use crate::extra_field::{self, ExtraField, Zip64ExtraField};
use crate::result::{ZipError, ZipResult};
use crate::spec::{self, DataDescriptor};
use crate::types::{DateTime, Version, ZipEntry};
use crate::BUFFER_SIZE;

/// Counts every byte passed through to the underlying stream, so member
/// offsets can be tracked without seeking.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.count += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Metadata for a member to be written
#[derive(Clone, Debug)]
pub struct FileOptions {
    pub(crate) compression_method: CompressionMethod,
    pub(crate) last_modified_time: DateTime,
    pub(crate) comment: Vec<u8>,
    pub(crate) large_file: bool,
    pub(crate) external_attributes: Option<u32>,
}

impl FileOptions {
    /// Set the compression method for the new member
    ///
    /// The default is `CompressionMethod::Deflated`.
    #[must_use]
    pub fn compression_method(mut self, method: CompressionMethod) -> FileOptions {
        self.compression_method = method;
        self
    }

    /// Set the last modified time
    ///
    /// The default is the current timestamp, clamped to the range the
    /// MS-DOS representation can express.
    #[must_use]
    pub fn last_modified_time(mut self, mod_time: DateTime) -> FileOptions {
        self.last_modified_time = mod_time;
        self
    }

    /// Attach a comment to the new member, at most 65535 bytes.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> FileOptions {
        self.comment = comment.into();
        self
    }

    /// Force ZIP64 framing for the new member.
    ///
    /// Members are widened automatically when a size or offset overflows
    /// the classic 32-bit fields; setting this spends 20 extra bytes on
    /// members that turn out to fit, in exchange for never needing the
    /// automatic upgrade. The default is `false`.
    #[must_use]
    pub fn large_file(mut self, large: bool) -> FileOptions {
        self.large_file = large;
        self
    }

    /// Store a raw external-attributes value for the new member.
    ///
    /// Defaults to zero for files; directories get the MS-DOS directory
    /// attribute.
    #[must_use]
    pub fn external_attributes(mut self, attributes: u32) -> FileOptions {
        self.external_attributes = Some(attributes);
        self
    }
}

impl Default for FileOptions {
    /// Construct a new FileOptions object
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflated,
            last_modified_time: DateTime::now(),
            comment: Vec::new(),
            large_file: false,
            external_attributes: None,
        }
    }
}

/// What an added member consists of.
enum MemberKind<'a> {
    File { source: &'a mut dyn Read },
    Directory,
}

/// ZIP archive generator
///
/// Writes members strictly front to back: every member is emitted as a
/// local header, the streamed body, and a data descriptor carrying the
/// CRC and sizes. The output stream is never seeked, so archives can be
/// streamed to a pipe or socket.
///
/// ```
/// # fn doit() -> zipstream::ZipResult<()>
/// # {
/// use std::io::Cursor;
/// use zipstream::{FileOptions, ZipWriter};
///
/// // We use a buffer here, though you'd normally use a `File`
/// let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
///
/// let options = FileOptions::default().compression_method(zipstream::CompressionMethod::Stored);
/// zip.add_bytes("hello_world.txt", "Hello, World!", options)?;
///
/// // Write the central directory. Dropping the `ZipWriter` has the same
/// // effect, but may silently fail.
/// zip.finish()?;
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct ZipWriter<W: Write> {
    inner: Option<CountingWriter<W>>,
    files: Vec<ZipEntry>,
    comment: Vec<u8>,
    version_made_by: Version,
    start_offset: u64,
    closed: bool,
}

impl ZipWriter<io::BufWriter<fs::File>> {
    /// Creates an archive file on disk.
    ///
    /// The file handle is owned by the writer and released when the
    /// writer is finished and dropped.
    pub fn create<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let file = fs::File::create(path).map_err(ZipError::Io)?;
        Ok(ZipWriter::new(io::BufWriter::new(file)))
    }
}

impl<W: Write> ZipWriter<W> {
    /// Initializes the archive.
    pub fn new(inner: W) -> ZipWriter<W> {
        ZipWriter::new_starting_at(inner, 0)
    }

    /// Initializes an archive whose first byte will land at `offset` in
    /// the final stream, for embedding an archive inside a larger file.
    ///
    /// The offset participates in every recorded position, including the
    /// decision to widen members to ZIP64.
    pub fn new_starting_at(inner: W, offset: u64) -> ZipWriter<W> {
        ZipWriter {
            inner: Some(CountingWriter::new(inner)),
            files: Vec::new(),
            comment: Vec::new(),
            version_made_by: Version::default(),
            start_offset: offset,
            closed: false,
        }
    }

    /// Set ZIP archive comment.
    pub fn set_comment<S>(&mut self, comment: S) -> ZipResult<()>
    where
        S: Into<String>,
    {
        self.set_raw_comment(comment.into().into())
    }

    /// Set ZIP archive comment.
    ///
    /// This sets the raw bytes of the comment. The comment
    /// is typically expected to be encoded in UTF-8
    pub fn set_raw_comment(&mut self, comment: Vec<u8>) -> ZipResult<()> {
        if comment.len() > 0xFFFF {
            return Err(ZipError::InvalidInput("comment is longer than 65535 bytes"));
        }
        self.comment = comment;
        Ok(())
    }

    /// Set the version-made-by value recorded for subsequent members.
    ///
    /// The default is 0.0 with compatibility byte 0.
    pub fn set_version_made_by(&mut self, version: Version) {
        self.version_made_by = version;
    }

    /// Bytes emitted so far, not counting the starting offset.
    pub fn bytes_written(&self) -> u64 {
        self.inner.as_ref().map_or(0, CountingWriter::count)
    }

    /// Position of the next byte in the final stream.
    fn offset(&self) -> u64 {
        self.start_offset + self.bytes_written()
    }

    /// Adds a member whose contents are streamed from `source`.
    ///
    /// Returns the number of bytes the member occupies in the archive,
    /// including its header and data descriptor.
    pub fn add<S, R>(&mut self, name: S, mut source: R, options: FileOptions) -> ZipResult<u64>
    where
        S: Into<String>,
        R: Read,
    {
        self.add_member(name.into(), MemberKind::File { source: &mut source }, options)
    }

    /// Adds a member with the given contents.
    pub fn add_bytes<S, B>(&mut self, name: S, payload: B, options: FileOptions) -> ZipResult<u64>
    where
        S: Into<String>,
        B: AsRef<[u8]>,
    {
        self.add(name, payload.as_ref(), options)
    }

    /// Add a directory entry.
    ///
    /// Directories have no contents, are always stored, and get a
    /// trailing slash appended to their name if it is missing.
    pub fn add_directory<S>(&mut self, name: S, mut options: FileOptions) -> ZipResult<u64>
    where
        S: Into<String>,
    {
        options.compression_method = CompressionMethod::Stored;

        let name_as_string = name.into();
        let name_with_slash = match name_as_string.chars().last() {
            Some('/') | Some('\\') => name_as_string,
            _ => name_as_string + "/",
        };

        self.add_member(name_with_slash, MemberKind::Directory, options)
    }

    fn add_member(
        &mut self,
        name: String,
        kind: MemberKind<'_>,
        options: FileOptions,
    ) -> ZipResult<u64> {
        if self.closed {
            return Err(ZipError::InvalidInput("writer is already closed"));
        }
        validate_member_name(&name)?;
        if options.comment.len() > 0xFFFF {
            return Err(ZipError::InvalidInput(
                "member comment is longer than 65535 bytes",
            ));
        }
        match options.compression_method {
            CompressionMethod::Stored | CompressionMethod::Deflated => {}
            CompressionMethod::Unsupported(_) => {
                return Err(ZipError::Unsupported("compression method is not supported"))
            }
        }

        let header_start = self.offset();
        let zip64 = options.large_file || header_start >= spec::ZIP64_BYTES_THR;

        let mut flags = spec::FLAG_DATA_DESCRIPTOR;
        if !name.is_ascii() {
            flags |= spec::FLAG_UTF8;
        }

        let external_attributes = options.external_attributes.unwrap_or(match kind {
            MemberKind::File { .. } => 0,
            MemberKind::Directory => 0x10 | 0x01,
        });

        let mut entry = ZipEntry {
            method: options.compression_method,
            last_modified: options.last_modified_time,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name_raw: name.clone().into_bytes(),
            file_name: name,
            comment: options.comment,
            flags,
            version_made_by: self.version_made_by,
            version_needed: if zip64 {
                Version::NEEDED_ZIP64
            } else {
                Version::NEEDED
            },
            internal_attributes: 0,
            external_attributes,
            header_start,
            data_start: Default::default(),
            extra_fields: Vec::new(),
            local_extra_fields: Default::default(),
            zip64,
        };

        let start_count = self.bytes_written();
        let writer = self
            .inner
            .as_mut()
            .ok_or(ZipError::InvalidInput("writer is already closed"))?;

        write_local_file_header(writer, &entry)?;

        let body = match kind {
            MemberKind::Directory => BodyCounts::default(),
            MemberKind::File { source } => {
                compress_body(entry.method, source, writer)?
            }
        };
        entry.crc32 = body.crc32;
        entry.uncompressed_size = body.uncompressed_size;
        entry.compressed_size = body.compressed_size;
        if body.uncompressed_size >= spec::ZIP64_BYTES_THR
            || body.compressed_size >= spec::ZIP64_BYTES_THR
        {
            entry.zip64 = true;
            entry.version_needed = Version::NEEDED_ZIP64;
        }

        DataDescriptor {
            crc32: entry.crc32,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            zip64: entry.zip64,
        }
        .write(writer)?;

        self.files.push(entry);
        Ok(self.bytes_written() - start_count)
    }

    /// Finish the archive by writing the central directory and trailer
    /// records, and return the total number of bytes emitted.
    ///
    /// Calling this a second time is an error; dropping an unfinished
    /// writer finishes it, discarding any failure.
    pub fn finish(&mut self) -> ZipResult<u64> {
        if self.closed {
            return Err(ZipError::InvalidInput("writer is already closed"));
        }
        let total = self.write_trailer()?;
        self.closed = true;
        Ok(total)
    }

    /// Finish the archive if needed and return the underlying stream.
    pub fn into_inner(mut self) -> ZipResult<W> {
        if !self.closed {
            self.finish()?;
        }
        self.inner
            .take()
            .map(CountingWriter::into_inner)
            .ok_or(ZipError::InvalidInput("writer is already closed"))
    }

    fn write_trailer(&mut self) -> ZipResult<u64> {
        let cdr_start = self.offset();
        {
            let writer = self
                .inner
                .as_mut()
                .ok_or(ZipError::InvalidInput("writer is already closed"))?;
            for file in self.files.iter() {
                write_central_directory_header(writer, file)?;
            }
        }
        let cdr_end = self.offset();
        let cdr_len = cdr_end - cdr_start;

        let entry_count = self.files.len();
        let writer = self
            .inner
            .as_mut()
            .ok_or(ZipError::InvalidInput("writer is already closed"))?;

        if entry_count >= spec::ZIP64_ENTRY_THR
            || cdr_start >= spec::ZIP64_BYTES_THR
            || cdr_len >= spec::ZIP64_BYTES_THR
        {
            spec::Zip64CentralDirectoryEnd {
                version_made_by: self.version_made_by.to_u16(),
                version_needed_to_extract: Version::NEEDED_ZIP64.to_u16(),
                disk_number: 0,
                disk_with_central_directory: 0,
                number_of_files_on_this_disk: entry_count as u64,
                number_of_files: entry_count as u64,
                central_directory_size: cdr_len,
                central_directory_offset: cdr_start,
            }
            .write(writer)?;

            spec::Zip64CentralDirectoryEndLocator {
                disk_with_central_directory: 0,
                end_of_central_directory_offset: cdr_end,
                number_of_disks: 1,
            }
            .write(writer)?;
        }

        let number_of_files = cmp::min(entry_count, spec::ZIP64_ENTRY_THR) as u16;
        spec::CentralDirectoryEnd {
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: number_of_files,
            number_of_files,
            central_directory_size: cmp::min(cdr_len, spec::ZIP64_BYTES_THR) as u32,
            central_directory_offset: cmp::min(cdr_start, spec::ZIP64_BYTES_THR) as u32,
            zip_file_comment: self.comment.clone(),
        }
        .write(writer)?;

        writer.flush()?;
        Ok(self.bytes_written())
    }
}

impl<W: Write> Drop for ZipWriter<W> {
    fn drop(&mut self) {
        if !self.closed && self.inner.is_some() {
            if let Err(e) = self.write_trailer() {
                let _ = write!(io::stderr(), "ZipWriter drop failed: {:?}", e);
            }
        }
    }
}

fn validate_member_name(name: &str) -> ZipResult<()> {
    if name.is_empty() {
        return Err(ZipError::InvalidInput("member path must not be empty"));
    }
    if name.len() > 65534 {
        return Err(ZipError::InvalidInput("member path is longer than 65534 bytes"));
    }
    if name.starts_with('/') {
        return Err(ZipError::InvalidInput("member path must not start with '/'"));
    }
    Ok(())
}

/// What the compression pipeline measured while streaming one body.
#[derive(Default)]
struct BodyCounts {
    crc32: u32,
    uncompressed_size: u64,
    compressed_size: u64,
}

enum BodyEncoder<'a, W: Write> {
    Storer(&'a mut CountingWriter<W>),
    Deflater(DeflateEncoder<&'a mut CountingWriter<W>>),
}

/// Streams `source` through the chosen codec into `writer`, tracking the
/// CRC-32 and both byte counts across 8 KiB chunks.
fn compress_body<W: Write>(
    method: CompressionMethod,
    source: &mut dyn Read,
    writer: &mut CountingWriter<W>,
) -> ZipResult<BodyCounts> {
    let start = writer.count();
    let mut crc = Crc32::new();
    let mut uncompressed_size = 0u64;

    let mut encoder = match method {
        CompressionMethod::Stored => BodyEncoder::Storer(writer),
        CompressionMethod::Deflated => {
            BodyEncoder::Deflater(DeflateEncoder::new(writer, Compression::default()))
        }
        CompressionMethod::Unsupported(_) => {
            return Err(ZipError::Unsupported("compression method is not supported"))
        }
    };

    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let count = source.read(&mut buf)?;
        if count == 0 {
            break;
        }
        crc.update(&buf[..count]);
        match &mut encoder {
            BodyEncoder::Storer(w) => w.write_all(&buf[..count])?,
            BodyEncoder::Deflater(w) => w.write_all(&buf[..count])?,
        }
        uncompressed_size += count as u64;
    }

    let writer = match encoder {
        BodyEncoder::Storer(w) => w,
        BodyEncoder::Deflater(w) => w.finish()?,
    };

    Ok(BodyCounts {
        crc32: crc.finalize(),
        uncompressed_size,
        compressed_size: writer.count() - start,
    })
}

fn write_local_file_header<T: Write>(writer: &mut T, file: &ZipEntry) -> ZipResult<()> {
    // local file header signature
    writer.write_u32::<LittleEndian>(spec::LOCAL_FILE_HEADER_SIGNATURE)?;
    // version needed to extract
    writer.write_u16::<LittleEndian>(file.version_needed.to_u16())?;
    // general purpose bit flag
    writer.write_u16::<LittleEndian>(file.flags)?;
    // compression method
    writer.write_u16::<LittleEndian>(file.method.to_u16())?;
    // last mod file time and last mod file date
    writer.write_u16::<LittleEndian>(file.last_modified.timepart())?;
    writer.write_u16::<LittleEndian>(file.last_modified.datepart())?;
    // crc-32 and sizes are zero here; the data descriptor carries them
    writer.write_u32::<LittleEndian>(0)?;
    if file.zip64 {
        writer.write_u32::<LittleEndian>(u32::MAX)?;
        writer.write_u32::<LittleEndian>(u32::MAX)?;
    } else {
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(0)?;
    }
    // file name length
    writer.write_u16::<LittleEndian>(file.file_name_raw.len() as u16)?;
    // extra field length
    let extra = local_extra_fields(file);
    writer.write_u16::<LittleEndian>(extra_field::encoded_len(&extra) as u16)?;
    // file name
    writer.write_all(&file.file_name_raw)?;
    // zip64 extra field
    extra_field::write_extra_fields(writer, &extra)?;

    Ok(())
}

/// The extras emitted into a local header: a ZIP64 record with size
/// placeholders for widened members, carrying the header offset too when
/// that overflowed.
fn local_extra_fields(file: &ZipEntry) -> Vec<ExtraField> {
    if !file.zip64 {
        return Vec::new();
    }
    let zip64 = Zip64ExtraField {
        uncompressed_size: Some(0),
        compressed_size: Some(0),
        header_offset: (file.header_start >= spec::ZIP64_BYTES_THR).then_some(file.header_start),
        disk_start: None,
    };
    vec![zip64.to_field()]
}

fn write_central_directory_header<T: Write>(writer: &mut T, file: &ZipEntry) -> ZipResult<()> {
    let extra = central_extra_fields(file);

    // central file header signature
    writer.write_u32::<LittleEndian>(spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE)?;
    // version made by
    writer.write_u16::<LittleEndian>(file.version_made_by.to_u16())?;
    // version needed to extract
    writer.write_u16::<LittleEndian>(file.version_needed.to_u16())?;
    // general purpose bit flag
    writer.write_u16::<LittleEndian>(file.flags)?;
    // compression method
    writer.write_u16::<LittleEndian>(file.method.to_u16())?;
    // last mod file time + date
    writer.write_u16::<LittleEndian>(file.last_modified.timepart())?;
    writer.write_u16::<LittleEndian>(file.last_modified.datepart())?;
    // crc-32
    writer.write_u32::<LittleEndian>(file.crc32)?;
    // compressed size
    writer.write_u32::<LittleEndian>(if file.zip64 {
        u32::MAX
    } else {
        file.compressed_size as u32
    })?;
    // uncompressed size
    writer.write_u32::<LittleEndian>(if file.zip64 {
        u32::MAX
    } else {
        file.uncompressed_size as u32
    })?;
    // file name length
    writer.write_u16::<LittleEndian>(file.file_name_raw.len() as u16)?;
    // extra field length
    writer.write_u16::<LittleEndian>(extra_field::encoded_len(&extra) as u16)?;
    // file comment length
    writer.write_u16::<LittleEndian>(file.comment.len() as u16)?;
    // disk number start
    writer.write_u16::<LittleEndian>(0)?;
    // internal file attributes
    writer.write_u16::<LittleEndian>(file.internal_attributes)?;
    // external file attributes
    writer.write_u32::<LittleEndian>(file.external_attributes)?;
    // relative offset of local header
    writer.write_u32::<LittleEndian>(cmp::min(file.header_start, spec::ZIP64_BYTES_THR) as u32)?;
    // file name
    writer.write_all(&file.file_name_raw)?;
    // zip64 extra field
    extra_field::write_extra_fields(writer, &extra)?;
    // file comment
    writer.write_all(&file.comment)?;

    Ok(())
}

/// The extras emitted into a central directory record: the ZIP64 fields
/// whose fixed-width counterparts were written as sentinels, in order.
fn central_extra_fields(file: &ZipEntry) -> Vec<ExtraField> {
    let zip64 = Zip64ExtraField {
        uncompressed_size: file.zip64.then_some(file.uncompressed_size),
        compressed_size: file.zip64.then_some(file.compressed_size),
        header_offset: (file.header_start >= spec::ZIP64_BYTES_THR).then_some(file.header_start),
        disk_start: None,
    };
    if zip64 == Zip64ExtraField::default() {
        Vec::new()
    } else {
        vec![zip64.to_field()]
    }
}
