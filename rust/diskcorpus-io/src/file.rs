use std::{
    fs::File,
    io::{BufWriter, Write},
    ops::Range,
    path::Path,
};

use bytes::{Bytes, BytesMut};

use crate::{ReadAt, SealingWrite, clip_range};

/// Write buffer of `FileWriter`, large enough to take a compressed frame in one call.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Positional reader over a published local file.
///
/// The size is captured on open: published artifacts never change.
pub struct FileReader {
    file: File,
    size: u64,
}

impl FileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<FileReader> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(FileReader { file, size })
    }
}

impl ReadAt for FileReader {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.size)
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let range = clip_range(range, self.size)?;
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let mut buf = BytesMut::zeroed((range.end - range.start) as usize);
        read_exact_at(&self.file, range.start, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Buffered writer of a new local file; `seal()` flushes and fsyncs it.
///
/// The file must not exist yet.
pub struct FileWriter {
    inner: Option<BufWriter<File>>,
}

impl FileWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<FileWriter> {
        let file = File::create_new(path)?;
        Ok(FileWriter {
            inner: Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
        })
    }

    fn sealed() -> std::io::Error {
        std::io::Error::other("file writer is already sealed")
    }
}

impl SealingWrite for FileWriter {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.as_mut().ok_or_else(Self::sealed)?.write_all(buf)
    }

    fn seal(&mut self) -> std::io::Result<()> {
        let writer = self.inner.take().ok_or_else(Self::sealed)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, pos: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.read_exact_at(buf, pos)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut pos: u64, mut buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        let n = file.seek_read(buf, pos)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf = &mut buf[n..];
        pos += n as u64;
    }
    Ok(())
}
