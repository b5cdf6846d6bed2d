//! Disk-resident document corpus with lazy remote hydration.
//!
//! A corpus is a collection of newline-delimited JSON documents split into
//! fixed-size shards, each stored as a seekable zstd data file plus an offsets
//! table. Shard artifacts are fetched from a remote collection on first use and
//! read with random access afterwards.

pub mod config;
pub mod corpus;
pub mod handle_cache;
pub mod hydration;
pub mod layout;
pub mod read;
pub mod search;
pub mod write;

#[cfg(test)]
mod tests;

pub use config::CorpusConfig;
pub use corpus::{CorpusStore, DecodedRecord, StoreOptions};
pub use hydration::{HydrationCache, HydrationOptions};
pub use layout::{CorpusLayout, GlobalDocId, ShardLocation};
