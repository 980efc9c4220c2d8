use std::io;
use std::io::prelude::*;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::result::{ZipError, ZipResult};

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
pub const CENTRAL_DIRECTORY_HEADER_SIGNATURE: u32 = 0x02014b50;
pub const CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06054b50;
pub const ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06064b50;
pub const ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Any 32-bit size or offset at or above this value must be widened to
/// ZIP64, with the fixed field holding the sentinel.
pub const ZIP64_BYTES_THR: u64 = 0xFFFF_FFFF;
/// Any 16-bit entry count at or above this value must be widened to ZIP64.
pub const ZIP64_ENTRY_THR: usize = 0xFFFF;

/// General-purpose flag bit 3: sizes and CRC follow the body in a data
/// descriptor and are zero in the local header.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General-purpose flag bit 11: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Size of the end-of-central-directory record without its comment.
pub const CENTRAL_DIRECTORY_END_SIZE: u64 = 22;

/*
Data descriptor:
      data descriptor signature       4 bytes  (0x08074b50)
      crc-32                          4 bytes
      compressed size                 4 bytes  (8 bytes for ZIP64)
      uncompressed size               4 bytes  (8 bytes for ZIP64)
*/
#[derive(Debug)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub zip64: bool,
}

impl DataDescriptor {
    pub fn write<T: Write>(&self, writer: &mut T) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        if self.zip64 {
            writer.write_u64::<LittleEndian>(self.compressed_size)?;
            writer.write_u64::<LittleEndian>(self.uncompressed_size)?;
        } else {
            writer.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            writer.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        }
        Ok(())
    }
}

/*
End of central directory record:
      end of central dir signature    4 bytes  (0x06054b50)
      number of this disk             2 bytes
      number of the disk with the
      start of the central directory  2 bytes
      total number of entries in the
      central directory on this disk  2 bytes
      total number of entries in
      the central directory           2 bytes
      size of the central directory   4 bytes
      offset of start of central
      directory with respect to
      the starting disk number        4 bytes
      .ZIP file comment length        2 bytes
      .ZIP file comment       (variable size)
*/
#[derive(Debug)]
pub struct CentralDirectoryEnd {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub number_of_files_on_this_disk: u16,
    pub number_of_files: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub zip_file_comment: Vec<u8>,
}

impl CentralDirectoryEnd {
    pub fn parse<T: Read>(reader: &mut T) -> ZipResult<CentralDirectoryEnd> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != CENTRAL_DIRECTORY_END_SIGNATURE {
            return Err(ZipError::BadMagic("end of central directory record"));
        }
        let disk_number = reader.read_u16::<LittleEndian>()?;
        let disk_with_central_directory = reader.read_u16::<LittleEndian>()?;
        let number_of_files_on_this_disk = reader.read_u16::<LittleEndian>()?;
        let number_of_files = reader.read_u16::<LittleEndian>()?;
        let central_directory_size = reader.read_u32::<LittleEndian>()?;
        let central_directory_offset = reader.read_u32::<LittleEndian>()?;
        let zip_file_comment_length = reader.read_u16::<LittleEndian>()? as usize;
        let mut zip_file_comment = vec![0u8; zip_file_comment_length];
        reader.read_exact(&mut zip_file_comment)?;

        Ok(CentralDirectoryEnd {
            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
            zip_file_comment,
        })
    }

    /// Locates the record by scanning backward from the end of the
    /// stream one byte at a time.
    ///
    /// A candidate position is accepted only when its comment-length
    /// field reaches exactly to the end of the stream, so a comment that
    /// happens to contain the signature cannot shadow the true record.
    pub fn find_and_parse<T: Read + io::Seek>(
        reader: &mut T,
    ) -> ZipResult<(CentralDirectoryEnd, u64)> {
        const HEADER_SIZE: u64 = CENTRAL_DIRECTORY_END_SIZE;
        // From the signature to the comment-length field.
        const BYTES_BETWEEN_MAGIC_AND_COMMENT_SIZE: u64 = HEADER_SIZE - 6;

        let file_length = reader.seek(io::SeekFrom::End(0))?;
        if file_length < HEADER_SIZE {
            return Err(ZipError::Truncated("end of central directory record"));
        }

        let mut pos = file_length - HEADER_SIZE;
        loop {
            reader.seek(io::SeekFrom::Start(pos))?;
            if reader.read_u32::<LittleEndian>()? == CENTRAL_DIRECTORY_END_SIGNATURE {
                reader.seek(io::SeekFrom::Current(
                    BYTES_BETWEEN_MAGIC_AND_COMMENT_SIZE as i64,
                ))?;
                let comment_length = reader.read_u16::<LittleEndian>()? as u64;
                if pos + HEADER_SIZE + comment_length == file_length {
                    reader.seek(io::SeekFrom::Start(pos))?;
                    return Ok((CentralDirectoryEnd::parse(reader)?, pos));
                }
            }
            if pos == 0 {
                return Err(ZipError::Format("end of central directory record not found"));
            }
            pos -= 1;
        }
    }

    /// Whether any field holds a sentinel and the true value lives in
    /// the ZIP64 end-of-central-directory record.
    pub fn needs_zip64(&self) -> bool {
        self.number_of_files_on_this_disk == 0xFFFF
            || self.number_of_files == 0xFFFF
            || self.central_directory_size == 0xFFFF_FFFF
            || self.central_directory_offset == 0xFFFF_FFFF
    }

    pub fn write<T: Write>(&self, writer: &mut T) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_END_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.disk_number)?;
        writer.write_u16::<LittleEndian>(self.disk_with_central_directory)?;
        writer.write_u16::<LittleEndian>(self.number_of_files_on_this_disk)?;
        writer.write_u16::<LittleEndian>(self.number_of_files)?;
        writer.write_u32::<LittleEndian>(self.central_directory_size)?;
        writer.write_u32::<LittleEndian>(self.central_directory_offset)?;
        writer.write_u16::<LittleEndian>(self.zip_file_comment.len() as u16)?;
        writer.write_all(&self.zip_file_comment)?;
        Ok(())
    }
}

/*
Zip64 end of central directory locator:
      zip64 end of central dir locator signature                   4 bytes  (0x07064b50)
      number of the disk with the zip64 end of central directory   4 bytes
      relative offset of the zip64 end of central directory record 8 bytes
      total number of disks                                        4 bytes
*/
#[derive(Debug)]
pub struct Zip64CentralDirectoryEndLocator {
    pub disk_with_central_directory: u32,
    pub end_of_central_directory_offset: u64,
    pub number_of_disks: u32,
}

impl Zip64CentralDirectoryEndLocator {
    pub fn parse<T: Read>(reader: &mut T) -> ZipResult<Zip64CentralDirectoryEndLocator> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE {
            return Err(ZipError::BadMagic("zip64 end of central directory locator"));
        }
        let disk_with_central_directory = reader.read_u32::<LittleEndian>()?;
        let end_of_central_directory_offset = reader.read_u64::<LittleEndian>()?;
        let number_of_disks = reader.read_u32::<LittleEndian>()?;

        Ok(Zip64CentralDirectoryEndLocator {
            disk_with_central_directory,
            end_of_central_directory_offset,
            number_of_disks,
        })
    }

    /// Scans backward from the end-of-central-directory position for the
    /// locator signature and returns the position it was found at.
    pub fn find<T: Read + io::Seek>(reader: &mut T, eocd_pos: u64) -> ZipResult<u64> {
        let mut pos = match eocd_pos.checked_sub(20) {
            Some(pos) => pos,
            None => {
                return Err(ZipError::Format(
                    "zip64 end of central directory locator not found",
                ))
            }
        };
        loop {
            reader.seek(io::SeekFrom::Start(pos))?;
            if reader.read_u32::<LittleEndian>()? == ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE {
                return Ok(pos);
            }
            if pos == 0 {
                return Err(ZipError::Format(
                    "zip64 end of central directory locator not found",
                ));
            }
            pos -= 1;
        }
    }

    pub fn write<T: Write>(&self, writer: &mut T) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.disk_with_central_directory)?;
        writer.write_u64::<LittleEndian>(self.end_of_central_directory_offset)?;
        writer.write_u32::<LittleEndian>(self.number_of_disks)?;
        Ok(())
    }
}

/*
Zip64 end of central directory record:
      zip64 end of central dir signature                            4 bytes  (0x06064b50)
      size of zip64 end of central directory record                 8 bytes
      version made by                                               2 bytes
      version needed to extract                                     2 bytes
      number of this disk                                           4 bytes
      number of the disk with the start of the central directory    4 bytes
      total number of entries in the central directory on this disk 8 bytes
      total number of entries in the central directory              8 bytes
      size of the central directory                                 8 bytes
      offset of central directory with respect of disk number       8 bytes
      zip64 extensible data sector                                  (variable size)
*/
#[derive(Debug)]
pub struct Zip64CentralDirectoryEnd {
    pub version_made_by: u16,
    pub version_needed_to_extract: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub number_of_files_on_this_disk: u64,
    pub number_of_files: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64CentralDirectoryEnd {
    /// Fixed size of the record counted from the version-made-by field,
    /// as stored in its size-of-remainder field.
    const REMAINDER_SIZE: u64 = 44;

    pub fn parse<T: Read>(reader: &mut T) -> ZipResult<Zip64CentralDirectoryEnd> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE {
            return Err(ZipError::BadMagic("zip64 end of central directory record"));
        }
        let record_size = reader.read_u64::<LittleEndian>()?;
        if record_size < Self::REMAINDER_SIZE {
            return Err(ZipError::Format(
                "zip64 end of central directory record is too small",
            ));
        }
        let version_made_by = reader.read_u16::<LittleEndian>()?;
        let version_needed_to_extract = reader.read_u16::<LittleEndian>()?;
        let disk_number = reader.read_u32::<LittleEndian>()?;
        let disk_with_central_directory = reader.read_u32::<LittleEndian>()?;
        let number_of_files_on_this_disk = reader.read_u64::<LittleEndian>()?;
        let number_of_files = reader.read_u64::<LittleEndian>()?;
        let central_directory_size = reader.read_u64::<LittleEndian>()?;
        let central_directory_offset = reader.read_u64::<LittleEndian>()?;
        // Extensible data is ignored; the caller repositions explicitly.

        Ok(Zip64CentralDirectoryEnd {
            version_made_by,
            version_needed_to_extract,
            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
        })
    }

    pub fn write<T: Write>(&self, writer: &mut T) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE)?;
        writer.write_u64::<LittleEndian>(Self::REMAINDER_SIZE)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed_to_extract)?;
        writer.write_u32::<LittleEndian>(self.disk_number)?;
        writer.write_u32::<LittleEndian>(self.disk_with_central_directory)?;
        writer.write_u64::<LittleEndian>(self.number_of_files_on_this_disk)?;
        writer.write_u64::<LittleEndian>(self.number_of_files)?;
        writer.write_u64::<LittleEndian>(self.central_directory_size)?;
        writer.write_u64::<LittleEndian>(self.central_directory_offset)?;
        Ok(())
    }
}
