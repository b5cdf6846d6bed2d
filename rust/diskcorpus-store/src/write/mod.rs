//! Corpus creation: seekable zstd shards, offsets tables and the collection config.

pub mod artifact_writer;
pub mod corpus_builder;
pub mod shard_writer;

pub use corpus_builder::{CorpusBuilder, CorpusSummary};
pub use shard_writer::{ShardSummary, ShardWriter, ShardWriterOptions};
