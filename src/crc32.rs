//! Helper module to compute a CRC32 checksum

use std::fmt;
use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Running CRC-32 built from per-chunk checksums.
///
/// Each chunk is hashed on its own and folded into the running state
/// with `Hasher::combine`, so the result is identical to hashing the
/// concatenation in one pass for every chunking of the input.
#[derive(Clone, Default)]
pub(crate) struct Crc32 {
    running: Option<Hasher>,
}

impl Crc32 {
    pub fn new() -> Crc32 {
        Crc32 { running: None }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        let mut piece = Hasher::new();
        piece.update(chunk);
        match self.running.as_mut() {
            // First chunk: the piece becomes the running state.
            None => self.running = Some(piece),
            Some(running) => running.combine(&piece),
        }
    }

    /// The checksum over everything fed so far.
    pub fn value(&self) -> u32 {
        match &self.running {
            None => 0,
            Some(running) => running.clone().finalize(),
        }
    }

    pub fn finalize(self) -> u32 {
        self.running.map_or(0, Hasher::finalize)
    }
}

/// Marker for a checksum failure detected at end of stream.
#[derive(Debug)]
pub(crate) struct CrcMismatch;

impl fmt::Display for CrcMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("crc32 mismatch")
    }
}

impl std::error::Error for CrcMismatch {}

/// Reader that validates the CRC32 when it reaches the EOF.
pub(crate) struct Crc32Reader<R> {
    inner: R,
    crc: Crc32,
    check: u32,
}

impl<R> Crc32Reader<R> {
    /// Get a new Crc32Reader which checks the inner reader against checksum.
    pub(crate) fn new(inner: R, checksum: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            crc: Crc32::new(),
            check: checksum,
        }
    }

    #[inline]
    fn check_matches(&self) -> bool {
        self.check == self.crc.value()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let invalid_check = !buf.is_empty() && !self.check_matches();

        let count = match self.inner.read(buf) {
            Ok(0) if invalid_check => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, CrcMismatch))
            }
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        self.crc.update(&buf[0..count]);
        Ok(count)
    }
}
