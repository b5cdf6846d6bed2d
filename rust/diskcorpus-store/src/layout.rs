//! Physical layout of a sharded corpus: mapping of global document ids onto shards,
//! in-shard offsets and artifact paths.

use diskcorpus_common::{Result, error::Error};

/// Opaque, dense, zero-based document identifier over the full corpus.
pub type GlobalDocId = u64;

/// Name of the top-level folder holding the corpus shards.
pub const CORPUS_FOLDER: &str = "corpus";

/// Extension of a shard data file (seekable zstd of newline-delimited JSON).
pub const DATA_FILE_EXTENSION: &str = "jsonl.zst";

/// Extension of a shard offsets table (npy array of decompressed byte offsets).
pub const OFFSETS_FILE_EXTENSION: &str = "jsonl.offsets";

/// Immutable description of how a corpus is split into shards and where the
/// shard artifacts live.
///
/// Invariants (enforced by [`CorpusLayout::new`]): `docs_per_shard >= 1` and
/// `shard_folder_depth <= shard_id_width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusLayout {
    docs_per_shard: u64,
    shard_id_width: u32,
    shard_folder_depth: u32,
    index_file_name: String,
}

/// The physical location of a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    pub shard_id: u64,
    /// Position of the document within its shard, always `< docs_per_shard`.
    pub inner_offset: u64,
    /// `/`-separated path of the shard data file, relative to the collection root.
    pub data_path: String,
    /// `/`-separated path of the shard offsets table, relative to the collection root.
    pub offsets_path: String,
}

impl CorpusLayout {
    pub fn new(
        docs_per_shard: u64,
        shard_id_width: u32,
        shard_folder_depth: u32,
        index_file_name: impl Into<String>,
    ) -> Result<CorpusLayout> {
        if docs_per_shard == 0 {
            return Err(Error::invalid_layout("docs_per_shard must be at least 1"));
        }
        if shard_folder_depth > shard_id_width {
            return Err(Error::invalid_layout(format!(
                "shard_folder_depth ({shard_folder_depth}) exceeds shard_id_width ({shard_id_width})"
            )));
        }
        Ok(CorpusLayout {
            docs_per_shard,
            shard_id_width,
            shard_folder_depth,
            index_file_name: index_file_name.into(),
        })
    }

    pub fn docs_per_shard(&self) -> u64 {
        self.docs_per_shard
    }

    pub fn shard_id_width(&self) -> u32 {
        self.shard_id_width
    }

    pub fn shard_folder_depth(&self) -> u32 {
        self.shard_folder_depth
    }

    pub fn index_file_name(&self) -> &str {
        &self.index_file_name
    }

    /// Splits a global id into `(shard_id, inner_offset)`.
    pub fn split_id(&self, id: GlobalDocId) -> (u64, u64) {
        (id / self.docs_per_shard, id % self.docs_per_shard)
    }

    /// Returns the shard id zero-padded to `shard_id_width` digits.
    ///
    /// Ids with more digits than the width are rendered in full.
    pub fn shard_stem(&self, shard_id: u64) -> String {
        format!("{shard_id:0width$}", width = self.shard_id_width as usize)
    }

    /// Returns the name of the folder containing the shard: the rightmost
    /// `shard_folder_depth` characters of the stem.
    ///
    /// A depth of zero selects the whole stem, matching the corpus build tooling.
    pub fn shard_folder(&self, shard_id: u64) -> String {
        let stem = self.shard_stem(shard_id);
        let depth = self.shard_folder_depth as usize;
        if depth == 0 || depth >= stem.len() {
            stem
        } else {
            stem[stem.len() - depth..].to_string()
        }
    }

    pub fn data_path(&self, shard_id: u64) -> String {
        self.shard_file_path(shard_id, DATA_FILE_EXTENSION)
    }

    pub fn offsets_path(&self, shard_id: u64) -> String {
        self.shard_file_path(shard_id, OFFSETS_FILE_EXTENSION)
    }

    /// Number of shards needed for a corpus of `corpus_size` documents.
    pub fn shard_count(&self, corpus_size: u64) -> u64 {
        corpus_size.div_ceil(self.docs_per_shard)
    }

    /// Maps a global document id onto its shard, in-shard offset and shard artifacts.
    pub fn locate(&self, id: GlobalDocId) -> ShardLocation {
        let (shard_id, inner_offset) = self.split_id(id);
        ShardLocation {
            shard_id,
            inner_offset,
            data_path: self.data_path(shard_id),
            offsets_path: self.offsets_path(shard_id),
        }
    }

    fn shard_file_path(&self, shard_id: u64, extension: &str) -> String {
        format!(
            "{CORPUS_FOLDER}/{}/{}.{extension}",
            self.shard_folder(shard_id),
            self.shard_stem(shard_id)
        )
    }
}
