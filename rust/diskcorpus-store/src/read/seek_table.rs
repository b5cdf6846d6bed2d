//! Frame index of a Zstandard seekable-format stream.
//!
//! The seek table is stored in a skippable frame at the end of the file:
//!
//! ```text
//! | magic 0x184D2A5E | frame_size | entries ... | num_frames | descriptor | 0x8F92EAB1 |
//! ```
//!
//! Each entry holds the compressed and decompressed size of one frame (plus a
//! checksum when bit 7 of the descriptor is set).

use byteorder::{ByteOrder, LittleEndian};
use diskcorpus_common::{Result, error::Error};
use diskcorpus_io::ReadAt;

pub const SKIPPABLE_FRAME_MAGIC: u32 = 0x184D_2A5E;
pub const SEEKABLE_MAGIC: u32 = 0x8F92_EAB1;

const FOOTER_SIZE: u64 = 9;
const SKIPPABLE_HEADER_SIZE: u64 = 8;
const CHECKSUM_FLAG: u8 = 0x80;
const RESERVED_BITS: u8 = 0x7C;

/// Location of one compressed frame within the file and within the decompressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    pub compressed_offset: u64,
    pub compressed_size: u32,
    pub decompressed_offset: u64,
    pub decompressed_size: u32,
}

impl FrameEntry {
    pub fn compressed_range(&self) -> std::ops::Range<u64> {
        self.compressed_offset..self.compressed_offset + self.compressed_size as u64
    }

    pub fn decompressed_end(&self) -> u64 {
        self.decompressed_offset + self.decompressed_size as u64
    }
}

#[derive(Debug, Clone)]
pub struct SeekTable {
    frames: Vec<FrameEntry>,
    decompressed_size: u64,
    has_checksums: bool,
}

impl SeekTable {
    /// Reads and validates the seek table at the end of `reader`.
    pub fn read(reader: &dyn ReadAt, shard: &str) -> Result<SeekTable> {
        let corrupt = |message: String| Error::corrupt_shard(shard, message);
        let (footer_start, footer) = reader
            .read_suffix(FOOTER_SIZE)
            .map_err(|e| Error::io(shard, e))?;
        let size = footer_start + footer.len() as u64;
        if footer.len() as u64 != FOOTER_SIZE || LittleEndian::read_u32(&footer[5..9]) != SEEKABLE_MAGIC
        {
            return Err(corrupt("missing seekable format magic".into()));
        }
        let num_frames = LittleEndian::read_u32(&footer[0..4]) as u64;
        let descriptor = footer[4];
        if descriptor & RESERVED_BITS != 0 {
            return Err(corrupt(format!(
                "reserved seek table descriptor bits are set ({descriptor:#04x})"
            )));
        }
        let has_checksums = descriptor & CHECKSUM_FLAG != 0;
        let entry_size = if has_checksums { 12 } else { 8 };

        let frame_size = num_frames * entry_size + FOOTER_SIZE;
        let table_size = SKIPPABLE_HEADER_SIZE + frame_size;
        if table_size > size || frame_size > u32::MAX as u64 {
            return Err(corrupt(format!(
                "seek table of {num_frames} frames does not fit in {size} bytes"
            )));
        }
        let table_start = size - table_size;
        let table = reader
            .read_at(table_start..size - FOOTER_SIZE)
            .map_err(|e| Error::io(shard, e))?;
        if table.len() as u64 != table_size - FOOTER_SIZE {
            return Err(corrupt("seek table is truncated".into()));
        }
        if LittleEndian::read_u32(&table[0..4]) != SKIPPABLE_FRAME_MAGIC
            || LittleEndian::read_u32(&table[4..8]) as u64 != frame_size
        {
            return Err(corrupt("invalid seek table frame header".into()));
        }

        let mut frames = Vec::with_capacity(num_frames as usize);
        let mut compressed_offset = 0u64;
        let mut decompressed_offset = 0u64;
        for entry in table[SKIPPABLE_HEADER_SIZE as usize..].chunks_exact(entry_size as usize) {
            let compressed_size = LittleEndian::read_u32(&entry[0..4]);
            let decompressed_size = LittleEndian::read_u32(&entry[4..8]);
            frames.push(FrameEntry {
                compressed_offset,
                compressed_size,
                decompressed_offset,
                decompressed_size,
            });
            compressed_offset += compressed_size as u64;
            decompressed_offset += decompressed_size as u64;
        }
        if compressed_offset != table_start {
            return Err(corrupt(format!(
                "seek table covers {compressed_offset} compressed bytes, frames occupy {table_start}"
            )));
        }

        Ok(SeekTable {
            frames,
            decompressed_size: decompressed_offset,
            has_checksums,
        })
    }

    pub fn frames(&self) -> &[FrameEntry] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total length of the decompressed stream.
    pub fn decompressed_size(&self) -> u64 {
        self.decompressed_size
    }

    pub fn has_checksums(&self) -> bool {
        self.has_checksums
    }

    /// Returns the index of the frame holding decompressed byte `offset`.
    pub fn frame_for(&self, offset: u64) -> Option<usize> {
        if offset >= self.decompressed_size {
            return None;
        }
        // Empty frames share their start offset with the next frame; skip past them.
        let index = self
            .frames
            .partition_point(|frame| frame.decompressed_end() <= offset);
        (index < self.frames.len()).then_some(index)
    }

    /// Encodes a seek table (without checksums) for frames of the given
    /// `(compressed_size, decompressed_size)`.
    pub fn encode(frames: &[(u32, u32)]) -> Vec<u8> {
        let frame_size = frames.len() as u32 * 8 + FOOTER_SIZE as u32;
        let mut buf = Vec::with_capacity(SKIPPABLE_HEADER_SIZE as usize + frame_size as usize);
        buf.extend_from_slice(&SKIPPABLE_FRAME_MAGIC.to_le_bytes());
        buf.extend_from_slice(&frame_size.to_le_bytes());
        for &(compressed, decompressed) in frames {
            buf.extend_from_slice(&compressed.to_le_bytes());
            buf.extend_from_slice(&decompressed.to_le_bytes());
        }
        buf.extend_from_slice(&(frames.len() as u32).to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&SEEKABLE_MAGIC.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use diskcorpus_common::error::ErrorKind;

    use super::SeekTable;

    fn table_over(frames: &[(u32, u32)]) -> Bytes {
        let payload_len = frames.iter().map(|f| f.0 as usize).sum::<usize>();
        let mut buf = vec![0xAB; payload_len];
        buf.extend_from_slice(&SeekTable::encode(frames));
        Bytes::from(buf)
    }

    #[test]
    fn test_read_table() {
        let data = table_over(&[(10, 100), (5, 0), (20, 50)]);
        let table = SeekTable::read(&data, "mem").unwrap();
        assert_eq!(table.frame_count(), 3);
        assert_eq!(table.decompressed_size(), 150);
        assert!(!table.has_checksums());
        assert_eq!(table.frames()[2].compressed_range(), 15..35);
        assert_eq!(table.frames()[2].decompressed_offset, 100);

        assert_eq!(table.frame_for(0), Some(0));
        assert_eq!(table.frame_for(99), Some(0));
        assert_eq!(table.frame_for(100), Some(2));
        assert_eq!(table.frame_for(149), Some(2));
        assert_eq!(table.frame_for(150), None);
    }

    #[test]
    fn test_checksummed_table() {
        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(&0x184D_2A5Eu32.to_le_bytes());
        buf.extend_from_slice(&(12u32 + 9).to_le_bytes());
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&0xDEADu32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(0x80);
        buf.extend_from_slice(&0x8F92_EAB1u32.to_le_bytes());
        let table = SeekTable::read(&Bytes::from(buf), "mem").unwrap();
        assert!(table.has_checksums());
        assert_eq!(table.decompressed_size(), 7);
    }

    #[test]
    fn test_missing_or_broken_table() {
        let corrupt = |data: Bytes| {
            let err = SeekTable::read(&data, "mem").unwrap_err();
            assert!(
                matches!(err.kind(), ErrorKind::CorruptShard { .. }),
                "unexpected error {err}"
            );
        };
        corrupt(Bytes::new());
        corrupt(Bytes::from_static(b"plain zstd frame without any table"));

        let mut data = table_over(&[(10, 100)]).to_vec();
        let len = data.len();
        data[len - 5] = 0x04;
        corrupt(Bytes::from(data));

        let mut data = table_over(&[(10, 100)]).to_vec();
        data.remove(0);
        corrupt(Bytes::from(data));

        let mut data = table_over(&[(10, 100)]).to_vec();
        data[10] = 0;
        corrupt(Bytes::from(data));
    }
}
