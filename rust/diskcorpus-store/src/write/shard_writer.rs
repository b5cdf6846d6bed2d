use diskcorpus_common::{Result, error::Error, verify_arg};

use super::artifact_writer::ArtifactWriter;
use crate::read::{offsets::encode_npy_u64, seek_table::SeekTable};

/// Parameters of the seekable zstd encoding of a shard.
#[derive(Debug, Clone)]
pub struct ShardWriterOptions {
    /// Decompressed size of each frame (the last frame may be shorter).
    pub frame_size: usize,
    pub compression_level: i32,
}

impl Default for ShardWriterOptions {
    fn default() -> Self {
        ShardWriterOptions {
            frame_size: 256 * 1024,
            compression_level: 3,
        }
    }
}

/// Statistics of a finished shard.
#[derive(Debug, Clone)]
pub struct ShardSummary {
    pub records: u64,
    pub frames: usize,
    pub decompressed_size: u64,
    pub compressed_size: u64,
    /// Start offset of each record in the decompressed stream.
    pub offsets: Vec<u64>,
}

/// Writes newline-delimited records as a seekable zstd stream.
///
/// The decompressed stream is cut into frames of exactly `frame_size` bytes
/// regardless of record boundaries, so a record may span several frames.
pub struct ShardWriter {
    data: ArtifactWriter,
    options: ShardWriterOptions,
    pending: Vec<u8>,
    frames: Vec<(u32, u32)>,
    offsets: Vec<u64>,
    decompressed_size: u64,
}

impl ShardWriter {
    pub fn new(data: ArtifactWriter, options: ShardWriterOptions) -> Result<ShardWriter> {
        verify_arg!(frame_size, options.frame_size > 0);
        verify_arg!(frame_size, options.frame_size <= u32::MAX as usize);
        Ok(ShardWriter {
            data,
            options,
            pending: Vec::new(),
            frames: Vec::new(),
            offsets: Vec::new(),
            decompressed_size: 0,
        })
    }

    pub fn record_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    /// Appends one record. The record must not contain a newline.
    pub fn push_record(&mut self, record: &[u8]) -> Result<()> {
        if record.contains(&b'\n') {
            return Err(Error::invalid_arg(
                "record",
                "records must not contain a newline",
            ));
        }
        self.offsets.push(self.decompressed_size);
        self.pending.extend_from_slice(record);
        self.pending.push(b'\n');
        self.decompressed_size += record.len() as u64 + 1;

        while self.pending.len() >= self.options.frame_size {
            let rest = self.pending.split_off(self.options.frame_size);
            let frame = std::mem::replace(&mut self.pending, rest);
            self.write_frame(&frame)?;
        }
        Ok(())
    }

    /// Appends a structured document as a single-line JSON record.
    pub fn push_json(&mut self, doc: &serde_json::Value) -> Result<()> {
        let record = serde_json::to_vec(doc)
            .map_err(|e| Error::invalid_arg("doc", e.to_string()))?;
        self.push_record(&record)
    }

    /// Flushes the last frame, appends the seek table and seals the data artifact.
    pub fn finish(mut self) -> Result<ShardSummary> {
        if !self.pending.is_empty() {
            let frame = std::mem::take(&mut self.pending);
            self.write_frame(&frame)?;
        }
        self.data.write_all(&SeekTable::encode(&self.frames))?;
        let compressed_size = self.data.seal()?;
        Ok(ShardSummary {
            records: self.offsets.len() as u64,
            frames: self.frames.len(),
            decompressed_size: self.decompressed_size,
            compressed_size,
            offsets: self.offsets,
        })
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let compressed = zstd::bulk::compress(frame, self.options.compression_level)
            .map_err(|e| Error::io(self.data.name().to_string(), e))?;
        if compressed.len() > u32::MAX as usize {
            return Err(Error::invalid_arg(
                "frame_size",
                "compressed frame exceeds 4 GiB",
            ));
        }
        self.data.write_all(&compressed)?;
        self.frames.push((compressed.len() as u32, frame.len() as u32));
        Ok(())
    }
}

/// Writes the offsets table of a shard.
pub fn write_offsets(mut writer: ArtifactWriter, offsets: &[u64]) -> Result<u64> {
    writer.write_all(&encode_npy_u64(offsets))?;
    writer.seal()
}
