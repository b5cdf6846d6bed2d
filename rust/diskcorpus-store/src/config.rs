//! The collection's `config.json`: layout parameters of the corpus, the name of the
//! ANN index artifact and the embedding model the index was built with.

use std::path::Path;

use diskcorpus_common::{Result, error::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::layout::CorpusLayout;

/// Name of the collection config artifact at the top level of the collection.
pub const CONFIG_FILE_NAME: &str = "config.json";

fn default_embedding_type() -> String {
    "float".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// ANN index artifact file name, at the top level of the collection.
    pub index: String,
    /// Embedding model identifier used to build the index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Embedding representation requested from the embedding provider.
    #[serde(default = "default_embedding_type")]
    pub embedding_type: String,
    /// Number of documents per shard.
    pub corpus_num_lines: u64,
    /// Zero-padded width of a shard id.
    pub corpus_file_len: u32,
    /// Number of trailing shard id digits used as the shard folder name.
    pub corpus_folder_len: u32,
    /// Total number of documents, when recorded at build time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_size: Option<u64>,
}

impl CorpusConfig {
    /// Loads the config from a local file.
    ///
    /// Fails with `ConfigMissing` if the file does not exist and with
    /// `InvalidConfig` if it cannot be parsed.
    pub fn load(path: &Path) -> Result<CorpusConfig> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ErrorKind::ConfigMissing {
                    path: path.display().to_string(),
                }
                .into());
            }
            Err(e) => return Err(diskcorpus_common::error::Error::io(path.display().to_string(), e)),
        };
        Self::from_slice(&content).map_err(|e| {
            ErrorKind::InvalidConfig {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn from_slice(content: &[u8]) -> serde_json::Result<CorpusConfig> {
        serde_json::from_slice(content)
    }

    /// Writes the config as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Validates the layout parameters and builds the corpus layout.
    pub fn layout(&self) -> Result<CorpusLayout> {
        CorpusLayout::new(
            self.corpus_num_lines,
            self.corpus_file_len,
            self.corpus_folder_len,
            self.index.clone(),
        )
    }
}
