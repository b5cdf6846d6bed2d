use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;

use crate::{
    RemoteObject, RemoteStore,
    url::{ObjectUrl, RelativePath},
};

/// Default base URL of the dataset hub hosting corpus collections.
pub const DEFAULT_BASE_URL: &str = "https://huggingface.co/datasets/";

/// Default collection revision.
pub const DEFAULT_REVISION: &str = "main";

/// A `RemoteStore` fetching artifacts over HTTP(S) from a container URL.
///
/// An artifact `path` is requested as `GET {container}{path}`; any non-2xx status
/// is a failed transfer.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    container: ObjectUrl,
}

impl HttpRemoteStore {
    /// Creates a store for the given container URL (must end with `/`).
    pub fn new(container: ObjectUrl) -> diskcorpus_common::Result<HttpRemoteStore> {
        Self::with_client(reqwest::Client::new(), container)
    }

    /// Creates a store using a preconfigured HTTP client (timeouts, proxies, headers).
    pub fn with_client(
        client: reqwest::Client,
        container: ObjectUrl,
    ) -> diskcorpus_common::Result<HttpRemoteStore> {
        if !container.is_container() {
            return Err(diskcorpus_common::error::Error::invalid_arg(
                "container",
                format!("'{}' is not a container url", container.as_str()),
            ));
        }
        Ok(HttpRemoteStore { client, container })
    }

    /// Creates a store for a named collection on a dataset hub, i.e. the container
    /// `{base_url}{collection}/resolve/{revision}/`.
    pub fn for_collection(
        base_url: &str,
        collection: &str,
        revision: &str,
    ) -> diskcorpus_common::Result<HttpRemoteStore> {
        let base = ObjectUrl::parse(base_url)?;
        let container = ObjectUrl::collection_container(&base, collection, revision)?;
        Self::new(container)
    }

    /// Returns the container URL of this store.
    pub fn container(&self) -> &ObjectUrl {
        &self.container
    }

    /// Resolves the full URL of an artifact.
    pub fn url_of(&self, path: RelativePath) -> diskcorpus_common::Result<ObjectUrl> {
        self.container.join(path)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(&self, path: RelativePath<'_>) -> std::io::Result<RemoteObject> {
        let url = self.url_of(path).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("fetch: invalid artifact path: {e}"),
            )
        })?;

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(std::io::Error::other)?;

        let status = response.status();
        if !status.is_success() {
            log::debug!("GET {} returned {status}", url.as_str());
            return Err(status_error(status, url.as_str()));
        }

        let size = response.content_length();
        let body = futures::stream::try_unfold(response, |mut response| async move {
            match response.chunk().await {
                Ok(Some(chunk)) => Ok(Some((chunk, response))),
                Ok(None) => Ok(None),
                Err(e) => Err(std::io::Error::other(e)),
            }
        })
        .boxed();

        Ok(RemoteObject { size, body })
    }

    fn describe(&self, path: RelativePath<'_>) -> String {
        match self.url_of(path) {
            Ok(url) => url.as_str().to_string(),
            Err(_) => format!("{}{path}", self.container.as_str()),
        }
    }
}

fn status_error(status: StatusCode, url: &str) -> std::io::Error {
    let kind = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => std::io::ErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => std::io::ErrorKind::PermissionDenied,
        _ => std::io::ErrorKind::Other,
    };
    std::io::Error::new(kind, format!("GET {url}: status {status}"))
}
