//! The three byte-source back-ends a [`super::BitmapStore`] can sit on
//! (`spec.md` §2 "Bitmap store", §4.2).
//!
//! Each back-end only needs to answer "give me bytes `[start, end)`"; the
//! materialization logic (offset lookup, bitvector construction) lives once
//! in [`super::BitmapStore`] and is shared across all three.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anybytes::Bytes;

use crate::error::{IbisError, Result};

/// A byte-range source for one serialized index's bitmap region.
pub trait ByteSource: Send + Sync {
    /// Total length of the underlying region, in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes in `[start, end)`. Implementations that hold the
    /// whole region in memory or mapped return a zero-copy slice;
    /// callback-backed sources perform the I/O here.
    fn read_range(&self, start: u64, end: u64) -> Result<Bytes>;
}

/// Whole-file (or whole-region) read, held entirely in an owned buffer.
#[derive(Clone)]
pub struct WholeFileSource {
    path: PathBuf,
    bytes: Bytes,
}

impl WholeFileSource {
    pub fn new(path: impl Into<PathBuf>, bytes: Bytes) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read(path).map_err(|e| IbisError::io(path, e))?;
        Ok(Self::new(path, Bytes::from_source(buf)))
    }
}

impl ByteSource for WholeFileSource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let (start, end) = (start as usize, end as usize);
        if end > self.bytes.len() || start > end {
            return Err(IbisError::integrity(
                &self.path,
                format!(
                    "range [{start}, {end}) out of bounds for {}-byte file",
                    self.bytes.len()
                ),
            ));
        }
        Ok(self.bytes.slice(start..end))
    }
}

/// Memory-mapped read. The mapping is kept alive for as long as any
/// [`Bytes`] sliced from it is alive, because `anybytes::Bytes::from_source`
/// takes ownership of the mapping itself.
pub struct MmapSource {
    path: PathBuf,
    bytes: Bytes,
}

impl MmapSource {
    /// # Safety
    /// Mapping a file that is concurrently truncated or modified by
    /// another process is undefined behavior; callers are expected to
    /// treat index files as write-once (`spec.md` §5 Transactions).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| IbisError::io(path, e))?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| IbisError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes: Bytes::from_source(mmap),
        })
    }
}

impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let (start, end) = (start as usize, end as usize);
        if end > self.bytes.len() || start > end {
            return Err(IbisError::integrity(
                &self.path,
                format!(
                    "range [{start}, {end}) out of bounds for {}-byte mapping",
                    self.bytes.len()
                ),
            ));
        }
        Ok(self.bytes.slice(start..end))
    }
}

/// Caller-supplied reader callback; no bytes are held between calls, so
/// every `read_range` performs the caller's I/O directly.
pub struct CallbackSource {
    len: u64,
    reader: Arc<dyn Fn(u64, u64) -> Result<Bytes> + Send + Sync>,
}

impl CallbackSource {
    pub fn new(len: u64, reader: Arc<dyn Fn(u64, u64) -> Result<Bytes> + Send + Sync>) -> Self {
        Self { len, reader }
    }
}

impl ByteSource for CallbackSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        if end > self.len || start > end {
            return Err(IbisError::integrity(
                "<callback store>",
                format!("range [{start}, {end}) out of bounds for {}-byte source", self.len),
            ));
        }
        (self.reader)(start, end)
    }
}
