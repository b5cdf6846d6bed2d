//! Byte-level I/O used by shard readers and artifact writers.
//!
//! `ReadAt` serves positional reads of immutable artifacts (shard data files are
//! never modified once published), `SealingWrite` appends to an artifact that only
//! counts as complete after `seal()`.

use std::{ops::Range, sync::Arc};

use bytes::Bytes;

pub mod file;
pub mod memory;

/// Positional reader over an immutable byte source.
///
/// There is no cursor: every call is independent, so one instance can serve
/// any number of concurrent readers.
pub trait ReadAt: Send + Sync + 'static {
    /// Total size of the source in bytes.
    fn size(&self) -> std::io::Result<u64>;

    /// Reads `range`. The result is shorter than requested only when the range
    /// extends past the end of the source.
    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes>;

    /// Reads the last `len` bytes of the source (or the whole source, if it is
    /// shorter) and returns them with their starting position.
    fn read_suffix(&self, len: u64) -> std::io::Result<(u64, Bytes)> {
        let size = self.size()?;
        let start = size.saturating_sub(len);
        Ok((start, self.read_at(start..size)?))
    }
}

/// Sequential writer whose output becomes durable on `seal()`.
///
/// Callers that publish the written object (e.g. by renaming a temporary file
/// into place) must do so only after a successful seal.
pub trait SealingWrite: Send {
    /// Appends the entire buffer.
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Flushes and commits everything written so far. No writes are accepted
    /// afterwards.
    fn seal(&mut self) -> std::io::Result<()>;
}

impl<T> ReadAt for Arc<T>
where
    T: ReadAt + ?Sized,
{
    fn size(&self) -> std::io::Result<u64> {
        self.as_ref().size()
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        self.as_ref().read_at(range)
    }
}

impl<T> SealingWrite for Box<T>
where
    T: SealingWrite + ?Sized,
{
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.as_mut().write_all(buf)
    }

    fn seal(&mut self) -> std::io::Result<()> {
        self.as_mut().seal()
    }
}

/// Clips `range` to a source of `size` bytes; an inverted range is an error.
pub(crate) fn clip_range(range: Range<u64>, size: u64) -> std::io::Result<Range<u64>> {
    if range.end < range.start {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("inverted read range {}..{}", range.start, range.end),
        ));
    }
    let start = range.start.min(size);
    Ok(start..range.end.min(size))
}
