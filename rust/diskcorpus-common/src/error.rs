use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shareable error source, reported to every waiter of a de-duplicated operation.
pub type StdErrorShared = Arc<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn invalid_layout(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidLayout {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn hydration_failed(artifact: impl Into<String>, cause: StdErrorShared) -> Error {
        Error(
            ErrorKind::HydrationFailed {
                artifact: artifact.into(),
                cause,
            }
            .into(),
        )
    }

    pub fn offset_out_of_range(id: u64, limit: u64) -> Error {
        Error(ErrorKind::OffsetOutOfRange { id, limit }.into())
    }

    pub fn corrupt_shard(shard: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::CorruptShard {
                shard: shard.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn decompression<E>(shard: impl Into<String>, offset: u64, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::DecompressionError {
                shard: shard.into(),
                offset,
                source: Box::new(source),
            }
            .into(),
        )
    }

    pub fn decode<E>(shard: impl Into<String>, offset: u64, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::DecodeError {
                shard: shard.into(),
                offset,
                source: Box::new(source),
            }
            .into(),
        )
    }

    pub fn embedding_provider(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::EmbeddingProviderError {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn ann_engine(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::AnnEngineError {
                message: message.into(),
            }
            .into(),
        )
    }

    /// Returns `true` if the error indicates a document id past the end of the corpus.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self.kind(), ErrorKind::OffsetOutOfRange { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error(
        "failed to resolve url '{url}' (relative: {}), reason: {reason}",
        relative.as_deref().unwrap_or_default())]
    ResolveUrl {
        url: String,
        relative: Option<String>,
        reason: String,
    },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("corpus config not found at '{path}'")]
    ConfigMissing { path: String },

    #[error("invalid corpus config '{path}': {message}")]
    InvalidConfig { path: String, message: String },

    #[error("invalid corpus layout: {message}")]
    InvalidLayout { message: String },

    #[error("failed to hydrate artifact '{artifact}': {cause}")]
    HydrationFailed {
        artifact: String,
        #[source]
        cause: StdErrorShared,
    },

    #[error("document {id} is out of range (limit {limit})")]
    OffsetOutOfRange { id: u64, limit: u64 },

    #[error("corrupt shard '{shard}': {message}")]
    CorruptShard { shard: String, message: String },

    #[error("failed to decompress shard '{shard}' at offset {offset}")]
    DecompressionError {
        shard: String,
        offset: u64,
        source: StdErrorBoxed,
    },

    #[error("failed to decode record in shard '{shard}' at offset {offset}")]
    DecodeError {
        shard: String,
        offset: u64,
        source: StdErrorBoxed,
    },

    #[error("embedding provider error: {message}")]
    EmbeddingProviderError { message: String },

    #[error("ANN engine error: {message}")]
    AnnEngineError { message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}
