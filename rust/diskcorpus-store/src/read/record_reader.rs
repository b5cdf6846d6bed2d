use std::{path::Path, sync::Arc};

use bytes::{Bytes, BytesMut};
use diskcorpus_common::{Result, error::Error};
use diskcorpus_io::{ReadAt, file::FileReader};

use super::seek_table::{FrameEntry, SeekTable};

/// Record terminator in the decompressed stream.
const RECORD_TERMINATOR: u8 = b'\n';

/// Random-access reader of newline-delimited records in a seekable zstd shard.
///
/// The frame index is parsed once on open. Every read decompresses only the
/// frames spanned by the requested record, and the reader holds no cursor, so a
/// single instance can serve any number of concurrent callers.
pub struct CompressedRandomAccessReader {
    reader: Arc<dyn ReadAt>,
    seek_table: SeekTable,
    shard: String,
}

impl CompressedRandomAccessReader {
    /// Opens the shard data file at `path`.
    ///
    /// Fails with `CorruptShard` if the file carries no valid seek table.
    pub fn open(path: &Path) -> Result<CompressedRandomAccessReader> {
        let shard = path.display().to_string();
        let reader = FileReader::open(path).map_err(|e| Error::io(shard.clone(), e))?;
        Self::from_read_at(Arc::new(reader), shard)
    }

    /// Creates a reader over any positional byte source.
    pub fn from_read_at(
        reader: Arc<dyn ReadAt>,
        shard: impl Into<String>,
    ) -> Result<CompressedRandomAccessReader> {
        let shard = shard.into();
        let seek_table = SeekTable::read(reader.as_ref(), &shard)?;
        Ok(CompressedRandomAccessReader {
            reader,
            seek_table,
            shard,
        })
    }

    /// Name of the shard, as used in error reports.
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Length of the shard's decompressed stream.
    pub fn decompressed_size(&self) -> u64 {
        self.seek_table.decompressed_size()
    }

    pub fn frame_count(&self) -> usize {
        self.seek_table.frame_count()
    }

    pub fn seek_table(&self) -> &SeekTable {
        &self.seek_table
    }

    /// Reads the record starting at decompressed byte `offset`, up to (and
    /// excluding) the next newline or the end of the stream.
    ///
    /// A record may continue across any number of frame boundaries.
    pub fn read_record_at(&self, offset: u64) -> Result<Bytes> {
        let Some(first) = self.seek_table.frame_for(offset) else {
            return Err(Error::offset_out_of_range(offset, self.decompressed_size()));
        };

        let mut record = BytesMut::new();
        let mut start = (offset - self.seek_table.frames()[first].decompressed_offset) as usize;
        for frame in &self.seek_table.frames()[first..] {
            let content = self.decompress_frame(frame, offset)?;
            let tail = &content[start..];
            if let Some(end) = memchr_newline(tail) {
                if record.is_empty() {
                    return Ok(content.slice(start..start + end));
                }
                record.extend_from_slice(&tail[..end]);
                return Ok(record.freeze());
            }
            record.extend_from_slice(tail);
            start = 0;
        }
        Ok(record.freeze())
    }

    /// Decompresses the whole frame at `index`.
    pub fn read_frame(&self, index: usize) -> Result<Bytes> {
        let frame = self.seek_table.frames().get(index).ok_or_else(|| {
            Error::invalid_arg(
                "index",
                format!("frame {index} of {}", self.frame_count()),
            )
        })?;
        self.decompress_frame(frame, frame.decompressed_offset)
    }

    fn decompress_frame(&self, frame: &FrameEntry, record_offset: u64) -> Result<Bytes> {
        let compressed = self
            .reader
            .read_at(frame.compressed_range())
            .map_err(|e| Error::io(self.shard.clone(), e))?;
        if compressed.len() != frame.compressed_size as usize {
            return Err(Error::corrupt_shard(
                self.shard.clone(),
                format!(
                    "frame at {} is truncated: {} of {} bytes",
                    frame.compressed_offset,
                    compressed.len(),
                    frame.compressed_size
                ),
            ));
        }
        if frame.decompressed_size == 0 {
            return Ok(Bytes::new());
        }
        let content = zstd::bulk::decompress(&compressed, frame.decompressed_size as usize)
            .map_err(|e| Error::decompression(self.shard.clone(), record_offset, e))?;
        if content.len() != frame.decompressed_size as usize {
            return Err(Error::decompression(
                self.shard.clone(),
                record_offset,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "frame at {} decompressed to {} bytes, seek table says {}",
                        frame.compressed_offset,
                        content.len(),
                        frame.decompressed_size
                    ),
                ),
            ));
        }
        Ok(Bytes::from(content))
    }
}

impl std::fmt::Debug for CompressedRandomAccessReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedRandomAccessReader")
            .field("shard", &self.shard)
            .field("frames", &self.frame_count())
            .field("decompressed_size", &self.decompressed_size())
            .finish()
    }
}

fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == RECORD_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use diskcorpus_common::error::ErrorKind;

    use super::CompressedRandomAccessReader;
    use crate::read::seek_table::SeekTable;

    /// Builds a seekable stream by cutting `content` into the given frame lengths.
    fn seekable(content: &[u8], frame_lens: &[usize]) -> Bytes {
        let mut buf = Vec::new();
        let mut frames = Vec::new();
        let mut pos = 0;
        for &len in frame_lens {
            let compressed = zstd::bulk::compress(&content[pos..pos + len], 3).unwrap();
            frames.push((compressed.len() as u32, len as u32));
            buf.extend_from_slice(&compressed);
            pos += len;
        }
        assert_eq!(pos, content.len());
        buf.extend_from_slice(&SeekTable::encode(&frames));
        Bytes::from(buf)
    }

    fn reader_over(data: Bytes) -> CompressedRandomAccessReader {
        CompressedRandomAccessReader::from_read_at(Arc::new(data), "mem").unwrap()
    }

    const CONTENT: &[u8] = b"{\"id\":0}\n{\"id\":1,\"text\":\"spans frames\"}\n{\"id\":2}\n";

    #[test]
    fn test_read_records_within_and_across_frames() {
        let reader = reader_over(seekable(CONTENT, &[12, 20, CONTENT.len() - 32]));
        assert_eq!(reader.frame_count(), 3);
        assert_eq!(reader.decompressed_size(), CONTENT.len() as u64);

        assert_eq!(reader.read_record_at(0).unwrap().as_ref(), b"{\"id\":0}");
        assert_eq!(
            reader.read_record_at(9).unwrap().as_ref(),
            b"{\"id\":1,\"text\":\"spans frames\"}"
        );
        let third = CONTENT.len() as u64 - 9;
        assert_eq!(reader.read_record_at(third).unwrap().as_ref(), b"{\"id\":2}");
    }

    #[test]
    fn test_last_record_without_terminator() {
        let content = b"first\nlast";
        let reader = reader_over(seekable(content, &[3, 7]));
        assert_eq!(reader.read_record_at(6).unwrap().as_ref(), b"last");
        assert_eq!(reader.read_record_at(2).unwrap().as_ref(), b"rst");
    }

    #[test]
    fn test_offset_past_end() {
        let reader = reader_over(seekable(CONTENT, &[CONTENT.len()]));
        let err = reader.read_record_at(CONTENT.len() as u64).unwrap_err();
        assert!(err.is_out_of_range());
    }

    #[test]
    fn test_corrupt_frame() {
        let mut data = seekable(CONTENT, &[CONTENT.len()]).to_vec();
        // Clobber the first block header, keeping the zstd magic and the seek table intact.
        for b in &mut data[6..12] {
            *b ^= 0xFF;
        }
        let reader = reader_over(Bytes::from(data));
        let err = reader.read_record_at(0).unwrap_err();
        match err.kind() {
            ErrorKind::DecompressionError { shard, offset, .. } => {
                assert_eq!(shard, "mem");
                assert_eq!(*offset, 0);
            }
            kind => panic!("unexpected kind {kind:?}"),
        }
    }

    #[test]
    fn test_plain_zstd_is_corrupt_shard() {
        let data = zstd::bulk::compress(CONTENT, 3).unwrap();
        let err =
            CompressedRandomAccessReader::from_read_at(Arc::new(Bytes::from(data)), "plain")
                .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CorruptShard { .. }));
    }

    #[test]
    fn test_concurrent_reads() {
        let reader = Arc::new(reader_over(seekable(CONTENT, &[12, 20, CONTENT.len() - 32])));
        std::thread::scope(|s| {
            for _ in 0..8 {
                let reader = reader.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        assert_eq!(reader.read_record_at(0).unwrap().as_ref(), b"{\"id\":0}");
                        assert_eq!(
                            reader.read_record_at(CONTENT.len() as u64 - 9).unwrap().as_ref(),
                            b"{\"id\":2}"
                        );
                    }
                });
            }
        });
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000.jsonl.zst");
        std::fs::write(&path, seekable(CONTENT, &[CONTENT.len()])).unwrap();
        let reader = CompressedRandomAccessReader::open(&path).unwrap();
        assert_eq!(reader.read_frame(0).unwrap().as_ref(), CONTENT);
        assert!(reader.read_frame(1).is_err());
    }
}
