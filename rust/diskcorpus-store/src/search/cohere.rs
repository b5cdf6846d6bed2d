use async_trait::async_trait;
use diskcorpus_common::{Result, error::Error};
use serde_json::json;

use super::EmbeddingProvider;

/// Environment variable holding the Cohere API key.
pub const API_KEY_ENV: &str = "COHERE_API_KEY";

pub const DEFAULT_ENDPOINT: &str = "https://api.cohere.com";

/// `EmbeddingProvider` backed by the Cohere embed API.
pub struct CohereEmbedder {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl CohereEmbedder {
    pub fn new(api_key: impl Into<String>) -> CohereEmbedder {
        CohereEmbedder {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Creates an embedder with the API key taken from `COHERE_API_KEY`.
    pub fn from_env() -> Result<CohereEmbedder> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Ok(Self::new(key)),
            _ => Err(Error::embedding_provider(format!(
                "{API_KEY_ENV} is not set"
            ))),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> CohereEmbedder {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> CohereEmbedder {
        self.client = client;
        self
    }

    fn embed_url(&self) -> String {
        format!("{}/v1/embed", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for CohereEmbedder {
    async fn embed(&self, text: &str, model: &str, embedding_type: &str) -> Result<Vec<f32>> {
        let body = json!({
            "texts": [text],
            "model": model,
            "input_type": "search_query",
            "embedding_types": [embedding_type],
        });
        let response = self
            .client
            .post(self.embed_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::embedding_provider(format!("embed request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::embedding_provider(format!(
                "embed request returned {status}: {detail}"
            )));
        }
        let reply = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::embedding_provider(format!("invalid embed response: {e}")))?;
        parse_embedding(&reply, embedding_type)
    }
}

/// Extracts `embeddings[embedding_type][0]` from an embed response.
fn parse_embedding(reply: &serde_json::Value, embedding_type: &str) -> Result<Vec<f32>> {
    let values = reply
        .get("embeddings")
        .and_then(|embeddings| embeddings.get(embedding_type))
        .and_then(|vectors| vectors.get(0))
        .and_then(|vector| vector.as_array())
        .ok_or_else(|| {
            Error::embedding_provider(format!(
                "embed response has no '{embedding_type}' embedding"
            ))
        })?;
    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| Error::embedding_provider("non-numeric embedding component"))
        })
        .collect()
}
