//! Per-shard table of record start offsets in the shard's decompressed stream.
//!
//! The table is stored as a NumPy `.npy` file holding a 1-D array of little-endian
//! integers, one entry per record. It is memory-mapped on open and never copied
//! into process memory as a whole.

use std::{fs::File, path::Path};

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use diskcorpus_common::{Result, error::Error};
use memmap2::Mmap;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetType {
    U64,
    I64,
    U32,
    I32,
}

impl OffsetType {
    fn from_descr(descr: &str) -> Option<OffsetType> {
        match descr {
            "<u8" => Some(OffsetType::U64),
            "<i8" => Some(OffsetType::I64),
            "<u4" => Some(OffsetType::U32),
            "<i4" => Some(OffsetType::I32),
            _ => None,
        }
    }

    fn item_size(self) -> usize {
        match self {
            OffsetType::U64 | OffsetType::I64 => 8,
            OffsetType::U32 | OffsetType::I32 => 4,
        }
    }
}

enum Backing {
    Mapped(Mmap),
    Memory(Bytes),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mapped(mmap) => mmap,
            Backing::Memory(bytes) => bytes,
        }
    }
}

/// Read-only offsets table of a single shard.
///
/// `OffsetIndex` is immutable after construction and may be shared freely
/// between threads.
pub struct OffsetIndex {
    backing: Backing,
    data_start: usize,
    len: u64,
    offset_type: OffsetType,
    name: String,
}

impl OffsetIndex {
    /// Memory-maps the offsets table at `path`.
    ///
    /// Fails with `CorruptShard` if the file is not a supported `.npy` array.
    pub fn open(path: &Path) -> Result<OffsetIndex> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| Error::io(name.clone(), e))?;
        let size = file.metadata().map_err(|e| Error::io(name.clone(), e))?.len();
        if size < NPY_MAGIC.len() as u64 + 4 {
            return Err(Error::corrupt_shard(name, "offsets table is truncated"));
        }
        // SAFETY: published shard artifacts are never rewritten or truncated in place.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(name.clone(), e))?;
        Self::from_backing(name, Backing::Mapped(mmap))
    }

    /// Creates an offsets table over an in-memory `.npy` image.
    pub fn from_bytes(name: impl Into<String>, bytes: Bytes) -> Result<OffsetIndex> {
        Self::from_backing(name.into(), Backing::Memory(bytes))
    }

    /// Number of records in the shard.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the decompressed byte offset at which record `inner_offset` starts.
    ///
    /// Fails with `OffsetOutOfRange` if `inner_offset >= len()`, which is the case
    /// for ids past the end of the final (possibly partial) shard.
    pub fn offset_of(&self, inner_offset: u64) -> Result<u64> {
        if inner_offset >= self.len {
            return Err(Error::offset_out_of_range(inner_offset, self.len));
        }
        let item_size = self.offset_type.item_size();
        let pos = self.data_start + inner_offset as usize * item_size;
        let item = &self.backing.as_slice()[pos..pos + item_size];
        let value = match self.offset_type {
            OffsetType::U64 => LittleEndian::read_u64(item),
            OffsetType::U32 => LittleEndian::read_u32(item) as u64,
            OffsetType::I64 => self.non_negative(LittleEndian::read_i64(item), inner_offset)?,
            OffsetType::I32 => {
                self.non_negative(LittleEndian::read_i32(item) as i64, inner_offset)?
            }
        };
        Ok(value)
    }

    fn non_negative(&self, value: i64, inner_offset: u64) -> Result<u64> {
        u64::try_from(value).map_err(|_| {
            Error::corrupt_shard(
                self.name.clone(),
                format!("negative offset {value} for record {inner_offset}"),
            )
        })
    }

    fn from_backing(name: String, backing: Backing) -> Result<OffsetIndex> {
        let header = NpyHeader::parse(backing.as_slice())
            .map_err(|message| Error::corrupt_shard(name.clone(), message))?;
        let item_size = header.offset_type.item_size() as u64;
        let available = (backing.as_slice().len() - header.data_start) as u64;
        if header.len.checked_mul(item_size).is_none_or(|needed| needed > available) {
            return Err(Error::corrupt_shard(
                name,
                format!(
                    "offsets table declares {} entries but holds {available} bytes",
                    header.len
                ),
            ));
        }
        Ok(OffsetIndex {
            backing,
            data_start: header.data_start,
            len: header.len,
            offset_type: header.offset_type,
            name,
        })
    }
}

impl std::fmt::Debug for OffsetIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetIndex")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("offset_type", &self.offset_type)
            .finish_non_exhaustive()
    }
}

struct NpyHeader {
    offset_type: OffsetType,
    len: u64,
    data_start: usize,
}

impl NpyHeader {
    fn parse(bytes: &[u8]) -> std::result::Result<NpyHeader, String> {
        if bytes.len() < 10 || &bytes[..NPY_MAGIC.len()] != NPY_MAGIC {
            return Err("missing npy magic".to_string());
        }
        let major = bytes[6];
        let (header_len, header_start) = match major {
            1 => (LittleEndian::read_u16(&bytes[8..10]) as usize, 10),
            2 | 3 if bytes.len() >= 12 => (LittleEndian::read_u32(&bytes[8..12]) as usize, 12),
            _ => return Err(format!("unsupported npy version {major}")),
        };
        let data_start = header_start + header_len;
        if data_start > bytes.len() {
            return Err("npy header is truncated".to_string());
        }
        let header = std::str::from_utf8(&bytes[header_start..data_start])
            .map_err(|_| "npy header is not valid text".to_string())?;

        let descr = header_value(header, "descr").ok_or("npy header has no descr")?;
        let descr = descr.trim_matches(|c| c == '\'' || c == '"');
        let offset_type = OffsetType::from_descr(descr)
            .ok_or_else(|| format!("unsupported offsets dtype '{descr}'"))?;

        let shape = header_value(header, "shape").ok_or("npy header has no shape")?;
        let dims = shape
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(str::trim)
            .filter(|dim| !dim.is_empty())
            .collect::<Vec<_>>();
        let [dim] = dims.as_slice() else {
            return Err(format!("offsets table must be one-dimensional, got {shape}"));
        };
        let len = dim
            .parse::<u64>()
            .map_err(|_| format!("invalid npy shape {shape}"))?;

        Ok(NpyHeader {
            offset_type,
            len,
            data_start,
        })
    }
}

/// Extracts the raw value of `key` from the Python dict literal of an npy header.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = header.find(&pattern)? + pattern.len();
    let rest = header[start..].trim_start();
    let end = match rest.chars().next()? {
        '(' => rest.find(')')? + 1,
        quote @ ('\'' | '"') => rest[1..].find(quote)? + 2,
        _ => rest.find([',', '}']).unwrap_or(rest.len()),
    };
    Some(rest[..end].trim())
}

/// Encodes offsets as a version 1.0 `.npy` image of little-endian `u64` values.
pub fn encode_npy_u64(offsets: &[u64]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<u8', 'fortran_order': False, 'shape': ({},), }}",
        offsets.len()
    );
    // The data section starts on a 64-byte boundary; the header ends with a newline.
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat(unpadded.next_multiple_of(64) - unpadded));
    header.push('\n');

    let mut buf = Vec::with_capacity(NPY_MAGIC.len() + 4 + header.len() + offsets.len() * 8);
    buf.extend_from_slice(NPY_MAGIC);
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buf.extend_from_slice(header.as_bytes());
    for offset in offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use diskcorpus_common::error::ErrorKind;

    use super::{OffsetIndex, encode_npy_u64};

    fn npy_image(descr: &str, shape: &str, data: &[u8]) -> Bytes {
        let header = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}\n");
        let mut buf = b"\x93NUMPY\x01\x00".to_vec();
        buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(data);
        Bytes::from(buf)
    }

    #[test]
    fn test_u64_table_roundtrip() {
        let offsets = [0u64, 17, 42, 1 << 33];
        let image = encode_npy_u64(&offsets);
        assert_eq!((image.len() - offsets.len() * 8) % 64, 0);

        let index = OffsetIndex::from_bytes("mem", Bytes::from(image)).unwrap();
        assert_eq!(index.len(), 4);
        for (i, &expected) in offsets.iter().enumerate() {
            assert_eq!(index.offset_of(i as u64).unwrap(), expected);
        }
    }

    #[test]
    fn test_out_of_range() {
        let index = OffsetIndex::from_bytes("mem", Bytes::from(encode_npy_u64(&[0, 10, 20])))
            .unwrap();
        let err = index.offset_of(3).unwrap_err();
        match err.kind() {
            ErrorKind::OffsetOutOfRange { id, limit } => assert_eq!((*id, *limit), (3, 3)),
            kind => panic!("unexpected kind {kind:?}"),
        }
        assert!(index.offset_of(u64::MAX).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_signed_and_narrow_dtypes() {
        let data = [5i64, 900].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>();
        let index = OffsetIndex::from_bytes("i8", npy_image("<i8", "(2,)", &data)).unwrap();
        assert_eq!(index.offset_of(1).unwrap(), 900);

        let data = [7u32, 70000].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>();
        let index = OffsetIndex::from_bytes("u4", npy_image("<u4", "(2,)", &data)).unwrap();
        assert_eq!(index.offset_of(1).unwrap(), 70000);

        let data = (-1i64).to_le_bytes();
        let index = OffsetIndex::from_bytes("neg", npy_image("<i8", "(1,)", &data)).unwrap();
        assert!(matches!(
            index.offset_of(0).unwrap_err().kind(),
            ErrorKind::CorruptShard { .. }
        ));
    }

    #[test]
    fn test_corrupt_tables() {
        let corrupt = |bytes: Bytes| {
            let err = OffsetIndex::from_bytes("bad", bytes).unwrap_err();
            assert!(
                matches!(err.kind(), ErrorKind::CorruptShard { .. }),
                "unexpected error {err}"
            );
        };
        corrupt(Bytes::from_static(b"not an npy file at all"));
        corrupt(npy_image(">u8", "(1,)", &[0; 8]));
        corrupt(npy_image("<f8", "(1,)", &[0; 8]));
        corrupt(npy_image("<u8", "(2, 2)", &[0; 32]));
        corrupt(npy_image("<u8", "(4,)", &[0; 16]));
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000.jsonl.offsets");
        std::fs::write(&path, encode_npy_u64(&[0, 3, 9])).unwrap();
        let index = OffsetIndex::open(&path).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.offset_of(2).unwrap(), 9);

        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            OffsetIndex::open(&path).unwrap_err().kind(),
            ErrorKind::CorruptShard { .. }
        ));
    }
}
