//! Parsing and serialization of the extra fields attached to ZIP records.

use std::io::prelude::*;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::result::{ZipError, ZipResult};

/// Header ID of the ZIP64 extended-information extra field.
pub const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// One tag-length-value record from an extras region.
///
/// Records with header IDs this crate does not understand are preserved
/// as-is; the writer never emits any field it did not itself construct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraField {
    /// Identifies the type of data in the payload.
    pub header_id: u16,
    /// The raw payload bytes.
    pub data: Vec<u8>,
}

/// Splits an extras region into its records.
///
/// The region must consist of whole records; anything left over is a
/// truncation error.
pub(crate) fn parse_extra_fields(mut data: &[u8]) -> ZipResult<Vec<ExtraField>> {
    let mut fields = Vec::new();
    while !data.is_empty() {
        if data.len() < 4 {
            return Err(ZipError::Truncated("extra field header"));
        }
        let header_id = data.read_u16::<LittleEndian>()?;
        let size = data.read_u16::<LittleEndian>()? as usize;
        if data.len() < size {
            return Err(ZipError::Truncated("extra field payload"));
        }
        fields.push(ExtraField {
            header_id,
            data: data[..size].to_vec(),
        });
        data = &data[size..];
    }
    Ok(fields)
}

/// Serializes records back into an extras region.
pub(crate) fn write_extra_fields<W: Write>(writer: &mut W, fields: &[ExtraField]) -> ZipResult<()> {
    for field in fields {
        writer.write_u16::<LittleEndian>(field.header_id)?;
        writer.write_u16::<LittleEndian>(field.data.len() as u16)?;
        writer.write_all(&field.data)?;
    }
    Ok(())
}

/// Total encoded size of a sequence of records.
pub(crate) fn encoded_len(fields: &[ExtraField]) -> usize {
    fields.iter().map(|f| 4 + f.data.len()).sum()
}

/// The ZIP64 extended-information extra field (0x0001).
///
/// Carries, in fixed order, the 64-bit values for whichever fields of
/// the fixed record were written as sentinels. The payload contains
/// exactly the needed fields, nothing more.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Zip64ExtraField {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    /// Decodes the payload, taking only the fields whose fixed-record
    /// counterparts were sentinelized.
    pub fn parse(
        field: &ExtraField,
        needs_uncompressed: bool,
        needs_compressed: bool,
        needs_offset: bool,
        needs_disk: bool,
    ) -> ZipResult<Zip64ExtraField> {
        let expected = 8 * (needs_uncompressed as usize + needs_compressed as usize + needs_offset as usize)
            + 4 * needs_disk as usize;
        if field.data.len() != expected {
            return Err(ZipError::Format("zip64 extra field has an unexpected length"));
        }

        let mut data = field.data.as_slice();
        let mut parsed = Zip64ExtraField::default();
        if needs_uncompressed {
            parsed.uncompressed_size = Some(data.read_u64::<LittleEndian>()?);
        }
        if needs_compressed {
            parsed.compressed_size = Some(data.read_u64::<LittleEndian>()?);
        }
        if needs_offset {
            parsed.header_offset = Some(data.read_u64::<LittleEndian>()?);
        }
        if needs_disk {
            parsed.disk_start = Some(data.read_u32::<LittleEndian>()?);
        }
        Ok(parsed)
    }

    /// Encodes the present fields, in canonical order, as a record.
    pub fn to_field(&self) -> ExtraField {
        let mut data = Vec::new();
        if let Some(size) = self.uncompressed_size {
            data.extend_from_slice(&size.to_le_bytes());
        }
        if let Some(size) = self.compressed_size {
            data.extend_from_slice(&size.to_le_bytes());
        }
        if let Some(offset) = self.header_offset {
            data.extend_from_slice(&offset.to_le_bytes());
        }
        if let Some(disk) = self.disk_start {
            data.extend_from_slice(&disk.to_le_bytes());
        }
        ExtraField {
            header_id: ZIP64_EXTRA_FIELD_ID,
            data,
        }
    }
}
