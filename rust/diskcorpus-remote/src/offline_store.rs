//! "offline" remote store: used when the collection is served entirely from a local
//! directory and nothing may be downloaded.

use async_trait::async_trait;

use crate::{RemoteObject, RemoteStore, url::RelativePath};

/// A `RemoteStore` that holds no artifacts.
///
/// Every `fetch` fails with `NotFound`, so a hydration request for an artifact
/// that is missing locally reports a clear, non-retryable error.
pub struct OfflineStore;

#[async_trait]
impl RemoteStore for OfflineStore {
    async fn fetch(&self, path: RelativePath<'_>) -> std::io::Result<RemoteObject> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("'{path}' is not available locally and no remote store is configured"),
        ))
    }

    fn describe(&self, path: RelativePath<'_>) -> String {
        format!("offline:{path}")
    }
}
