//! Query-time orchestration: embed the query text, search the ANN index, resolve
//! the hits against the corpus store.

pub mod cohere;

use std::sync::Arc;

use async_trait::async_trait;
use diskcorpus_common::{
    Result,
    async_runtime::spawn_blocking,
    error::{Error, ErrorKind},
};

use crate::{
    config::CONFIG_FILE_NAME,
    corpus::{CorpusStore, DecodedRecord},
    layout::GlobalDocId,
};

/// Embedding representation requested when the config does not name one.
pub const DEFAULT_EMBEDDING_TYPE: &str = "float";

/// External service turning query text into a dense vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embeds `text` with the given model and representation.
    ///
    /// Failures are reported as `EmbeddingProviderError`.
    async fn embed(&self, text: &str, model: &str, embedding_type: &str) -> Result<Vec<f32>>;
}

/// External approximate nearest neighbor index over the corpus embeddings.
///
/// Searches are blocking and are run on the blocking task pool.
pub trait AnnEngine: Send + Sync + 'static {
    /// Returns up to `top_k` `(id, score)` hits, most relevant first.
    ///
    /// Failures are reported as `AnnEngineError`.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(GlobalDocId, f32)>>;
}

/// Semantic search over a disk-resident corpus.
pub struct DiskSearch {
    store: Arc<CorpusStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    engine: Arc<dyn AnnEngine>,
    model: String,
    embedding_type: String,
}

impl DiskSearch {
    /// Creates a search over `store`, using the embedding model and
    /// representation named in the store's config.
    pub fn new(
        store: Arc<CorpusStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        engine: Arc<dyn AnnEngine>,
    ) -> Result<DiskSearch> {
        let config = store.config();
        let model = match &config.model {
            Some(model) => model.clone(),
            None => {
                return Err(ErrorKind::InvalidConfig {
                    path: store.hydration().local_path(CONFIG_FILE_NAME)?.display().to_string(),
                    message: "no embedding model is named".to_string(),
                }
                .into());
            }
        };
        let embedding_type = if config.embedding_type.is_empty() {
            DEFAULT_EMBEDDING_TYPE.to_string()
        } else {
            config.embedding_type.clone()
        };
        Ok(DiskSearch {
            store,
            embedder,
            engine,
            model,
            embedding_type,
        })
    }

    /// Overrides the embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> DiskSearch {
        self.model = model.into();
        self
    }

    pub fn store(&self) -> &Arc<CorpusStore> {
        &self.store
    }

    /// Embeds the query and returns the ANN hits, without resolving them.
    pub async fn hits(&self, query: &str, top_k: usize) -> Result<Vec<(GlobalDocId, f32)>> {
        let vector = self
            .embedder
            .embed(query, &self.model, &self.embedding_type)
            .await?;
        let engine = self.engine.clone();
        spawn_blocking(move || engine.search(&vector, top_k))
            .await
            .map_err(|e| Error::ann_engine(e.to_string()))?
    }

    /// Searches and resolves the top `top_k` documents, failing on the first error.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<DecodedRecord>> {
        let hits = self.hits(query, top_k).await?;
        self.store.resolve(&hits).await
    }

    /// Searches and resolves the top `top_k` documents, reporting failures per hit.
    pub async fn search_best_effort(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Result<DecodedRecord>>> {
        let hits = self.hits(query, top_k).await?;
        Ok(self.store.resolve_best_effort(&hits).await)
    }
}
