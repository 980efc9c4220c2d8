//! Types for reading ZIP archives

use std::cmp;
use std::collections::HashMap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;

use crate::compression::CompressionMethod;
use crate::crc32::{Crc32Reader, CrcMismatch};
use crate::extra_field::{self, ExtraField, Zip64ExtraField, ZIP64_EXTRA_FIELD_ID};
use crate::result::{ZipError, ZipResult};
use crate::spec;
use crate::types::{DateTime, Version, ZipEntry};
use crate::BUFFER_SIZE;

// The open step distills the central directory into an immutable
// snapshot; only the stream handle stays mutable afterwards.
pub(crate) mod zip_archive {
    /// Everything `ZipArchive::new` learns from the central directory:
    /// the entry table, the name index, and the archive comment. Fixed
    /// for the life of the archive and shared behind an `Arc`.
    #[derive(Debug)]
    pub(crate) struct Shared {
        pub(super) files: Vec<crate::types::ZipEntry>,
        pub(super) names_map: super::HashMap<String, usize>,
        pub(super) comment: Vec<u8>,
    }

    /// ZIP archive reader
    ///
    /// The central directory is parsed once, when the archive is opened;
    /// member contents are decompressed on demand.
    ///
    /// ```no_run
    /// use std::io::prelude::*;
    ///
    /// fn dump(reader: impl Read + Seek) -> zipstream::ZipResult<()> {
    ///     let mut zip = zipstream::ZipArchive::new(reader)?;
    ///
    ///     for i in 0..zip.len() {
    ///         let mut member = zip.by_index(i)?;
    ///         println!("{} ({} bytes)", member.name(), member.size());
    ///         member.extract(&mut std::io::sink())?;
    ///     }
    ///
    ///     Ok(())
    /// }
    /// ```
    #[derive(Debug)]
    pub struct ZipArchive<R> {
        pub(super) reader: R,
        pub(super) shared: super::Arc<Shared>,
    }
}
pub use zip_archive::ZipArchive;

/// Hands out at most a fixed number of bytes from an underlying stream.
pub(crate) struct Limiter<S>
where
    S: Read,
{
    source_stream: S,
    full_len: u64,
    internal_pos: u64,
}

impl<S> Limiter<S>
where
    S: Read,
{
    pub(crate) fn take(source_stream: S, limit: u64) -> Self {
        Self {
            source_stream,
            full_len: limit,
            internal_pos: 0,
        }
    }

    /// Bytes handed out so far.
    #[inline]
    pub(crate) fn consumed(&self) -> u64 {
        self.internal_pos
    }

    #[inline]
    fn remaining_len(&self) -> u64 {
        self.full_len - self.internal_pos
    }
}

impl<S> Read for Limiter<S>
where
    S: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let num_bytes_to_read = cmp::min(self.remaining_len(), buf.len() as u64) as usize;
        if num_bytes_to_read == 0 {
            return Ok(0);
        }

        let bytes_read = self.source_stream.read(&mut buf[..num_bytes_to_read])?;
        debug_assert!(bytes_read <= num_bytes_to_read);
        self.internal_pos += bytes_read as u64;
        Ok(bytes_read)
    }
}

pub(crate) enum ZipFileReader<S>
where
    S: Read,
{
    Stored(Limiter<S>),
    Deflated(DeflateDecoder<Limiter<S>>),
}

impl<S> Read for ZipFileReader<S>
where
    S: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ZipFileReader::Stored(r) => r.read(buf),
            ZipFileReader::Deflated(r) => r.read(buf),
        }
    }
}

impl<S> ZipFileReader<S>
where
    S: Read,
{
    /// Compressed bytes actually consumed by the decoder.
    fn bytes_consumed(&self) -> u64 {
        match self {
            ZipFileReader::Stored(r) => r.consumed(),
            ZipFileReader::Deflated(r) => r.total_in(),
        }
    }
}

/// A single member opened for reading.
///
/// Implements [`Read`], yielding the decompressed contents; the CRC-32
/// is verified once the end of the stream is reached.
pub struct ZipFile<S>
where
    S: Read,
{
    data: ZipEntry,
    reader: Crc32Reader<ZipFileReader<S>>,
}

/// Locates the body of a member by walking its local header.
fn find_content<'a, R>(data: &ZipEntry, reader: &'a mut R) -> ZipResult<Limiter<&'a mut R>>
where
    R: Read + io::Seek,
{
    let data_start = match data.data_start.get() {
        Some(start) => *start,
        None => {
            reader.seek(io::SeekFrom::Start(data.header_start))?;
            let signature = reader.read_u32::<LittleEndian>()?;
            if signature != spec::LOCAL_FILE_HEADER_SIGNATURE {
                return Err(ZipError::BadMagic("local file header"));
            }

            reader.seek(io::SeekFrom::Current(22))?;
            let file_name_length = reader.read_u16::<LittleEndian>()? as u64;
            /* NB: zip files have separate local and central extra data records. The length of the
             * local extra field can only be taken from the local header. */
            let extra_field_length = reader.read_u16::<LittleEndian>()? as u64;
            let start = data.header_start + 30 + file_name_length + extra_field_length;
            let _ = data.data_start.set(start);
            start
        }
    };

    reader.seek(io::SeekFrom::Start(data_start))?;
    Ok(Limiter::take(reader, data.compressed_size))
}

fn make_reader<S>(
    method: CompressionMethod,
    crc32: u32,
    reader: Limiter<S>,
) -> ZipResult<Crc32Reader<ZipFileReader<S>>>
where
    S: Read,
{
    let wrapped = match method {
        CompressionMethod::Stored => ZipFileReader::Stored(reader),
        CompressionMethod::Deflated => ZipFileReader::Deflated(DeflateDecoder::new(reader)),
        CompressionMethod::Unsupported(_) => {
            return Err(ZipError::Unsupported("compression method is not supported"))
        }
    };
    Ok(Crc32Reader::new(wrapped, crc32))
}

/// Translates decoder-side I/O failures into codec errors.
fn map_read_error(err: io::Error) -> ZipError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        return ZipError::Truncated("compressed data ended early");
    }
    if err
        .get_ref()
        .map_or(false, |inner| inner.is::<CrcMismatch>())
    {
        return ZipError::Decode("crc32 mismatch");
    }
    match err.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            ZipError::Decode("invalid deflate stream")
        }
        _ => ZipError::Io(err),
    }
}

impl ZipArchive<io::BufReader<fs::File>> {
    /// Opens an archive on the filesystem.
    ///
    /// The file handle is owned by the returned archive and released
    /// when it is dropped.
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let file = fs::File::open(path).map_err(ZipError::Io)?;
        ZipArchive::new(io::BufReader::new(file))
    }
}

impl<R: Read + io::Seek> ZipArchive<R> {
    /// Read a ZIP archive, collecting the files it contains
    ///
    /// This uses the central directory record of the ZIP file, and ignores local file headers
    pub fn new(mut reader: R) -> ZipResult<ZipArchive<R>> {
        let (footer, eocd_pos) = spec::CentralDirectoryEnd::find_and_parse(&mut reader)?;

        if footer.disk_number != 0
            || footer.disk_with_central_directory != 0
            || footer.number_of_files_on_this_disk != footer.number_of_files
        {
            return Err(ZipError::Unsupported("multi-disk archives are not supported"));
        }

        let mut entry_count = footer.number_of_files as u64;
        let mut cdr_len = footer.central_directory_size as u64;
        let mut cdr_offset = footer.central_directory_offset as u64;

        if footer.needs_zip64() {
            let locator_pos = spec::Zip64CentralDirectoryEndLocator::find(&mut reader, eocd_pos)?;
            reader.seek(io::SeekFrom::Start(locator_pos))?;
            let locator = spec::Zip64CentralDirectoryEndLocator::parse(&mut reader)?;
            if locator.disk_with_central_directory != 0 || locator.number_of_disks > 1 {
                return Err(ZipError::Unsupported("multi-disk archives are not supported"));
            }

            reader.seek(io::SeekFrom::Start(locator.end_of_central_directory_offset))?;
            let footer64 = spec::Zip64CentralDirectoryEnd::parse(&mut reader)?;
            if footer64.disk_number != 0
                || footer64.disk_with_central_directory != 0
                || footer64.number_of_files_on_this_disk != footer64.number_of_files
            {
                return Err(ZipError::Unsupported("multi-disk archives are not supported"));
            }

            entry_count = footer64.number_of_files;
            cdr_len = footer64.central_directory_size;
            cdr_offset = footer64.central_directory_offset;
        }

        let end_pos = reader.seek(io::SeekFrom::End(0))?;
        let cdr_end = cdr_offset
            .checked_add(cdr_len)
            .filter(|end| *end < end_pos)
            .ok_or(ZipError::Format(
                "central directory extends past the end of the archive",
            ))?;

        reader.seek(io::SeekFrom::Start(cdr_offset))?;

        // Bound the allocation; a hostile count cannot claim more
        // entries than the directory has bytes for.
        let file_capacity = cmp::min(entry_count, cdr_len / 46) as usize;
        let mut files = Vec::with_capacity(file_capacity);
        let mut names_map = HashMap::with_capacity(file_capacity);

        for _ in 0..entry_count {
            let file = central_header_to_entry(&mut reader)?;
            if reader.stream_position()? > cdr_end {
                return Err(ZipError::Format("read past the end of the central directory"));
            }
            // The first of several identically named entries wins.
            names_map.entry(file.file_name.clone()).or_insert(files.len());
            files.push(file);
        }

        let shared = Arc::new(zip_archive::Shared {
            files,
            names_map,
            comment: footer.zip_file_comment,
        });

        Ok(ZipArchive { reader, shared })
    }

    /// Extract the archive into a directory, overwriting files if they
    /// already exist. Paths are sanitized with [`ZipEntry::enclosed_name`].
    ///
    /// Extraction is not atomic; If an error is encountered, some of the files
    /// may be left on disk.
    pub fn extract<P: AsRef<Path>>(&mut self, directory: P) -> ZipResult<()> {
        for i in 0..self.len() {
            let mut file = self.by_index(i)?;
            let filepath = file
                .entry()
                .enclosed_name()
                .ok_or(ZipError::Format("member path escapes the target directory"))?;

            let outpath = directory.as_ref().join(filepath);

            if file.entry().is_dir() {
                fs::create_dir_all(&outpath)?;
            } else {
                if let Some(p) = outpath.parent() {
                    if !p.exists() {
                        fs::create_dir_all(p)?;
                    }
                }
                let mut outfile = fs::File::create(&outpath)?;
                file.extract(&mut outfile)?;
            }
        }
        Ok(())
    }

    /// Number of members contained in this zip.
    pub fn len(&self) -> usize {
        self.shared.files.len()
    }

    /// Whether this zip archive contains no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the comment of the zip archive.
    ///
    /// Producers usually encode it as UTF-8, but the format does not
    /// require that, so the raw bytes are returned.
    pub fn comment(&self) -> &[u8] {
        &self.shared.comment
    }

    /// The members of the archive, in central directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.shared.files
    }

    /// Get a member's metadata by index.
    pub fn entry(&self, index: usize) -> Option<&ZipEntry> {
        self.shared.files.get(index)
    }

    /// Get a member's metadata by name.
    ///
    /// When several members share a name, the first one wins.
    pub fn entry_by_name(&self, name: &str) -> Option<&ZipEntry> {
        let index = *self.shared.names_map.get(name)?;
        self.shared.files.get(index)
    }

    /// Returns an iterator over all the file and directory names in this archive.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.shared.names_map.keys().map(|s| s.as_str())
    }

    /// Search for a member by name and open it for reading.
    pub fn by_name(&mut self, name: &str) -> ZipResult<ZipFile<&mut R>> {
        let index = match self.shared.names_map.get(name) {
            Some(index) => *index,
            None => return Err(ZipError::InvalidInput("no member with the given name")),
        };
        self.by_index(index)
    }

    /// Get a contained member by index and open it for reading.
    pub fn by_index(&mut self, index: usize) -> ZipResult<ZipFile<&mut R>> {
        let data = self
            .shared
            .files
            .get(index)
            .ok_or(ZipError::InvalidInput("member index out of range"))?;

        let limiter = find_content(data, &mut self.reader)?;
        let reader = make_reader(data.method, data.crc32, limiter)?;
        Ok(ZipFile {
            data: data.clone(),
            reader,
        })
    }

    /// The extra fields stored in a member's local header.
    ///
    /// These are fetched from the stream on first access and memoized on
    /// the entry; the central directory carries its own, separate set.
    pub fn local_extra_fields(&mut self, index: usize) -> ZipResult<&[ExtraField]> {
        let Self { reader, shared } = self;
        let data = shared
            .files
            .get(index)
            .ok_or(ZipError::InvalidInput("member index out of range"))?;
        let fields = data
            .local_extra_fields
            .get_or_try_init(|| read_local_extra_fields(reader, data))?;
        Ok(fields)
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn read_local_extra_fields<R>(reader: &mut R, data: &ZipEntry) -> ZipResult<Vec<ExtraField>>
where
    R: Read + io::Seek,
{
    reader.seek(io::SeekFrom::Start(data.header_start))?;
    let signature = reader.read_u32::<LittleEndian>()?;
    if signature != spec::LOCAL_FILE_HEADER_SIGNATURE {
        return Err(ZipError::BadMagic("local file header"));
    }

    reader.seek(io::SeekFrom::Current(22))?;
    let file_name_length = reader.read_u16::<LittleEndian>()? as i64;
    let extra_field_length = reader.read_u16::<LittleEndian>()? as usize;
    reader.seek(io::SeekFrom::Current(file_name_length))?;

    let mut raw = vec![0u8; extra_field_length];
    reader.read_exact(&mut raw)?;
    extra_field::parse_extra_fields(&raw)
}

/// Parse a central directory entry to collect the information for the file.
pub(crate) fn central_header_to_entry<R: Read>(reader: &mut R) -> ZipResult<ZipEntry> {
    let signature = reader.read_u32::<LittleEndian>()?;
    if signature != spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE {
        return Err(ZipError::BadMagic("central directory entry"));
    }

    let version_made_by = reader.read_u16::<LittleEndian>()?;
    let version_needed = reader.read_u16::<LittleEndian>()?;
    let flags = reader.read_u16::<LittleEndian>()?;
    let method = reader.read_u16::<LittleEndian>()?;
    let last_mod_time = reader.read_u16::<LittleEndian>()?;
    let last_mod_date = reader.read_u16::<LittleEndian>()?;
    let crc32 = reader.read_u32::<LittleEndian>()?;
    let compressed_size = reader.read_u32::<LittleEndian>()?;
    let uncompressed_size = reader.read_u32::<LittleEndian>()?;
    let file_name_length = reader.read_u16::<LittleEndian>()? as usize;
    let extra_field_length = reader.read_u16::<LittleEndian>()? as usize;
    let file_comment_length = reader.read_u16::<LittleEndian>()? as usize;
    let disk_start = reader.read_u16::<LittleEndian>()?;
    let internal_attributes = reader.read_u16::<LittleEndian>()?;
    let external_attributes = reader.read_u32::<LittleEndian>()?;
    let offset = reader.read_u32::<LittleEndian>()?;

    let mut file_name_raw = vec![0u8; file_name_length];
    reader.read_exact(&mut file_name_raw)?;
    let mut extra_field_raw = vec![0u8; extra_field_length];
    reader.read_exact(&mut extra_field_raw)?;
    let mut comment = vec![0u8; file_comment_length];
    reader.read_exact(&mut comment)?;

    let extra_fields = extra_field::parse_extra_fields(&extra_field_raw)?;

    let needs_uncompressed = uncompressed_size == u32::MAX;
    let needs_compressed = compressed_size == u32::MAX;
    let needs_offset = offset == u32::MAX;
    let needs_disk = disk_start == u16::MAX;
    let zip64 = needs_uncompressed || needs_compressed || needs_offset || needs_disk;

    let mut uncompressed_size = uncompressed_size as u64;
    let mut compressed_size = compressed_size as u64;
    let mut header_start = offset as u64;
    let mut disk_start = disk_start as u32;

    if zip64 {
        let field = extra_fields
            .iter()
            .find(|f| f.header_id == ZIP64_EXTRA_FIELD_ID)
            .ok_or(ZipError::Format("zip64 extra field is missing"))?;
        let parsed = Zip64ExtraField::parse(
            field,
            needs_uncompressed,
            needs_compressed,
            needs_offset,
            needs_disk,
        )?;
        if let Some(size) = parsed.uncompressed_size {
            uncompressed_size = size;
        }
        if let Some(size) = parsed.compressed_size {
            compressed_size = size;
        }
        if let Some(start) = parsed.header_offset {
            header_start = start;
        }
        if let Some(disk) = parsed.disk_start {
            disk_start = disk;
        }
    }

    if disk_start != 0 {
        return Err(ZipError::Unsupported("multi-disk archives are not supported"));
    }

    let file_name = String::from_utf8_lossy(&file_name_raw).into_owned();

    Ok(ZipEntry {
        method: CompressionMethod::from_u16(method),
        last_modified: DateTime::from_msdos(last_mod_date, last_mod_time),
        crc32,
        compressed_size,
        uncompressed_size,
        file_name,
        file_name_raw,
        comment,
        flags,
        version_made_by: Version::from_u16(version_made_by),
        version_needed: Version::from_u16(version_needed),
        internal_attributes,
        external_attributes,
        header_start,
        data_start: Default::default(),
        extra_fields,
        local_extra_fields: Default::default(),
        zip64,
    })
}

/// Methods for retrieving information on zip files
impl<S> ZipFile<S>
where
    S: Read,
{
    /// The metadata of the member being read.
    pub fn entry(&self) -> &ZipEntry {
        &self.data
    }

    /// Get the name of the member.
    pub fn name(&self) -> &str {
        self.data.name()
    }

    /// Get the size of the member once extracted.
    pub fn size(&self) -> u64 {
        self.data.size()
    }

    /// Get the size of the member inside the archive.
    pub fn compressed_size(&self) -> u64 {
        self.data.compressed_size()
    }

    /// Get the compression method used to store the member.
    pub fn compression(&self) -> CompressionMethod {
        self.data.compression_method()
    }

    /// Get the CRC-32 of the uncompressed contents.
    pub fn crc32(&self) -> u32 {
        self.data.crc32()
    }

    /// Whether the member is a directory.
    pub fn is_dir(&self) -> bool {
        self.data.is_dir()
    }

    /// Copies the member's decompressed contents into `sink`.
    ///
    /// On success the number of bytes written equals the recorded
    /// uncompressed size. The stream is verified on the way out: a CRC
    /// mismatch, a length mismatch on either side of the codec, or a
    /// short compressed body all fail the extraction.
    pub fn extract<W: Write>(&mut self, sink: &mut W) -> ZipResult<u64> {
        let mut buf = [0u8; BUFFER_SIZE];
        let mut written = 0u64;
        loop {
            let count = self.reader.read(&mut buf).map_err(map_read_error)?;
            if count == 0 {
                break;
            }
            sink.write_all(&buf[..count]).map_err(ZipError::Io)?;
            written += count as u64;
        }

        if written != self.data.uncompressed_size {
            return Err(ZipError::Decode("uncompressed size mismatch"));
        }
        if self.reader.get_ref().bytes_consumed() != self.data.compressed_size {
            return Err(ZipError::Decode("compressed size mismatch"));
        }
        Ok(written)
    }
}

impl<S> Read for ZipFile<S>
where
    S: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}
