//! Read-side access to a single hydrated shard: the offsets table and the
//! compressed record stream.

pub mod offsets;
pub mod record_reader;
pub mod seek_table;

pub use offsets::OffsetIndex;
pub use record_reader::CompressedRandomAccessReader;
pub use seek_table::SeekTable;
