//! Error types that can be emitted from this library

use std::io;

use thiserror::Error;

/// Generic result type with ZipError as its error variant
pub type ZipResult<T> = Result<T, ZipError>;

/// Error type for Zip
#[derive(Debug, Error)]
pub enum ZipError {
    /// The caller supplied an argument the codec cannot accept, or used a
    /// writer that was already closed.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// The archive uses a feature this crate does not implement.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// The input ended before a complete record or body could be read.
    #[error("truncated input: {0}")]
    Truncated(&'static str),

    /// A record at a known offset did not start with its signature.
    #[error("bad magic number: {0}")]
    BadMagic(&'static str),

    /// A record was present but internally inconsistent.
    #[error("malformed archive: {0}")]
    Format(&'static str),

    /// The compressed stream could not be decoded.
    #[error("decode error: {0}")]
    Decode(&'static str),

    /// An error caused by I/O on the backing stream.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> ZipError {
        // Short reads on fixed-size records are format truncation, not
        // transport failures.
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::Truncated("unexpected end of input")
        } else {
            ZipError::Io(err)
        }
    }
}
