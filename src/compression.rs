//! Possible ZIP compression methods.

use std::fmt;

/// Identifies the storage format used for a ZIP file's contents.
///
/// Only `Stored` and `Deflated` can be read and written; every other
/// method number is carried through as `Unsupported` so archives using
/// them can still be listed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Contents are stored as-is (method 0).
    Stored,
    /// Contents are compressed with raw DEFLATE (method 8).
    Deflated,
    /// Any method this crate does not implement.
    Unsupported(u16),
}

impl CompressionMethod {
    /// Converts a wire-format method number into a `CompressionMethod`.
    pub fn from_u16(val: u16) -> CompressionMethod {
        match val {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            v => CompressionMethod::Unsupported(v),
        }
    }

    /// Converts a `CompressionMethod` into its wire-format number.
    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompressionMethod::Stored => write!(f, "Stored"),
            CompressionMethod::Deflated => write!(f, "Deflated"),
            CompressionMethod::Unsupported(v) => write!(f, "Unsupported({})", v),
        }
    }
}
