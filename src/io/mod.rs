//! Bounded I/O utilities for reading package members.
//!
//! Package contents are untrusted; every member read during snapshot
//! construction goes through a [`BoundedReader`] so a single oversized file
//! cannot exhaust memory.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Default cap on bytes read from one package member (10MB)
pub const DEFAULT_MEMBER_LIMIT: u64 = 10 * 1024 * 1024;

/// A bounded reader that limits the amount of data read.
pub struct BoundedReader<R> {
    inner: R,
    bytes_read: u64,
    limit: u64,
}

impl<R: Read> BoundedReader<R> {
    pub fn new(reader: R, limit: u64) -> Self {
        Self {
            inner: reader,
            bytes_read: 0,
            limit,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether the limit has been reached.
    pub fn exhausted(&self) -> bool {
        self.bytes_read >= self.limit
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.exhausted() {
            debug!("BoundedReader reached limit of {} bytes", self.limit);
            return Ok(0);
        }

        let remaining = self.limit - self.bytes_read;
        let max_to_read = std::cmp::min(buf.len() as u64, remaining) as usize;
        let n = self.inner.read(&mut buf[..max_to_read])?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Bytes read from a member and whether the read stopped at the limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedRead {
    pub data: Vec<u8>,
    pub truncated: bool,
}

/// Utility functions for safe I/O operations.
pub struct IOUtils;

impl IOUtils {
    /// Read at most `limit` bytes of a file, reporting truncation.
    pub fn read_member<P: AsRef<Path>>(path: P, limit: u64) -> io::Result<BoundedRead> {
        let path = path.as_ref();
        let size = Self::file_size(path)?;
        let file = File::open(path)?;
        let mut reader = BoundedReader::new(file, limit);
        let mut data = Vec::with_capacity(std::cmp::min(size, limit) as usize);
        reader.read_to_end(&mut data)?;

        let truncated = size > limit;
        if truncated {
            warn!(
                "Member {:?} truncated to {} of {} bytes",
                path, limit, size
            );
        }
        Ok(BoundedRead { data, truncated })
    }

    /// Get file size without opening it.
    pub fn file_size<P: AsRef<Path>>(path: P) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }
}
