use std::path::{Path, PathBuf};

use diskcorpus_common::{Result, error::Error};

use super::{
    artifact_writer::{LocalArtifact, write_artifact},
    shard_writer::{ShardWriter, ShardWriterOptions, write_offsets},
};
use crate::{
    config::{CONFIG_FILE_NAME, CorpusConfig},
    layout::{CorpusLayout, GlobalDocId},
};

/// Summary of a finished corpus build.
#[derive(Debug, Clone)]
pub struct CorpusSummary {
    pub config: CorpusConfig,
    pub shards: u64,
    pub compressed_size: u64,
}

/// Builds a local collection directory from a stream of documents.
///
/// Documents receive dense global ids in push order. Every `docs_per_shard`
/// documents form one shard; each shard's data file and offsets table are
/// published once the shard is complete. `config.json`, recording the corpus
/// size, is published last.
pub struct CorpusBuilder {
    root: PathBuf,
    config: CorpusConfig,
    layout: CorpusLayout,
    options: ShardWriterOptions,
    current: Option<OpenShard>,
    next_id: GlobalDocId,
    shards: u64,
    compressed_size: u64,
}

struct OpenShard {
    shard_id: u64,
    data: LocalArtifact,
    writer: ShardWriter,
}

impl CorpusBuilder {
    pub fn new(
        root: impl Into<PathBuf>,
        config: CorpusConfig,
        options: ShardWriterOptions,
    ) -> Result<CorpusBuilder> {
        let layout = config.layout()?;
        Ok(CorpusBuilder {
            root: root.into(),
            config,
            layout,
            options,
            current: None,
            next_id: 0,
            shards: 0,
            compressed_size: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &CorpusLayout {
        &self.layout
    }

    /// Number of documents pushed so far.
    pub fn len(&self) -> u64 {
        self.next_id
    }

    pub fn is_empty(&self) -> bool {
        self.next_id == 0
    }

    /// Appends a structured document and returns its global id.
    pub fn push(&mut self, doc: &serde_json::Value) -> Result<GlobalDocId> {
        let record =
            serde_json::to_vec(doc).map_err(|e| Error::invalid_arg("doc", e.to_string()))?;
        self.push_record(&record)
    }

    /// Appends a document given as a single line of JSON and returns its global id.
    pub fn push_line(&mut self, line: &str) -> Result<GlobalDocId> {
        let line = line.trim_end_matches(['\r', '\n']);
        serde_json::from_str::<serde::de::IgnoredAny>(line)
            .map_err(|e| Error::invalid_arg("line", format!("document {}: {e}", self.next_id)))?;
        self.push_record(line.as_bytes())
    }

    fn push_record(&mut self, record: &[u8]) -> Result<GlobalDocId> {
        let id = self.next_id;
        let (shard_id, _) = self.layout.split_id(id);
        if self.current.as_ref().is_some_and(|shard| shard.shard_id != shard_id) {
            self.finish_shard()?;
        }
        if self.current.is_none() {
            self.current = Some(self.open_shard(shard_id)?);
        }
        if let Some(shard) = self.current.as_mut() {
            shard.writer.push_record(record)?;
        }
        self.next_id += 1;
        Ok(id)
    }

    /// Publishes the last shard and the collection config.
    pub fn finish(mut self) -> Result<CorpusSummary> {
        self.finish_shard()?;
        self.config.corpus_size = Some(self.next_id);
        write_artifact(
            self.root.join(CONFIG_FILE_NAME),
            self.config.to_json().as_bytes(),
        )?;
        log::info!(
            "built corpus at {}: {} documents in {} shards",
            self.root.display(),
            self.next_id,
            self.shards
        );
        Ok(CorpusSummary {
            config: self.config,
            shards: self.shards,
            compressed_size: self.compressed_size,
        })
    }

    fn open_shard(&self, shard_id: u64) -> Result<OpenShard> {
        let (data, writer) =
            LocalArtifact::create(self.local_path(&self.layout.data_path(shard_id)))?;
        let writer = ShardWriter::new(writer, self.options.clone())?;
        Ok(OpenShard {
            shard_id,
            data,
            writer,
        })
    }

    fn finish_shard(&mut self) -> Result<()> {
        let Some(shard) = self.current.take() else {
            return Ok(());
        };
        let summary = shard.writer.finish()?;
        let (offsets, writer) =
            LocalArtifact::create(self.local_path(&self.layout.offsets_path(shard.shard_id)))?;
        write_offsets(writer, &summary.offsets)?;
        // The offsets table goes first: a present data file implies a complete shard.
        offsets.publish()?;
        shard.data.publish()?;

        log::debug!(
            "wrote shard {}: {} records, {} frames, {} -> {} bytes",
            shard.shard_id,
            summary.records,
            summary.frames,
            summary.decompressed_size,
            summary.compressed_size
        );
        self.shards += 1;
        self.compressed_size += summary.compressed_size;
        Ok(())
    }

    fn local_path(&self, artifact: &str) -> PathBuf {
        artifact
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}
