//! *Remote artifact store* abstraction: a "storage service" client capable of
//! streaming the bytes of a named artifact of a corpus collection.
//!
//! Artifacts are always addressed by a [`RelativePath`] within the collection
//! (e.g. `config.json` or `corpus/02/0002.jsonl.zst`); each store maps that path
//! onto its own namespace.

pub mod http_store;
pub mod local_store;
pub mod offline_store;
pub mod url;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::url::RelativePath;

/// A stream of artifact body chunks, in order.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// An artifact being transferred from a remote store.
pub struct RemoteObject {
    /// Total size of the artifact in bytes, when announced by the store.
    pub size: Option<u64>,
    /// The artifact body. A transfer is complete only when the stream ends
    /// without an error (and, if `size` is known, after exactly `size` bytes).
    pub body: ByteStream,
}

/// The `RemoteStore` trait represents the source of corpus artifacts that are
/// not yet present in local storage.
///
/// Errors are reported as `std::io::Error`:
/// - `NotFound`: the artifact does not exist in the store (a permanent failure).
/// - `PermissionDenied`: the store rejected the request (a permanent failure).
/// - anything else: a transport failure that may succeed on retry.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Starts the transfer of the artifact at `path`.
    async fn fetch(&self, path: RelativePath<'_>) -> std::io::Result<RemoteObject>;

    /// Describes the location of `path` within this store, for diagnostics.
    fn describe(&self, path: RelativePath<'_>) -> String;
}

/// Returns `true` if the transfer error is not expected to go away on retry.
pub fn is_permanent_failure(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
    )
}
