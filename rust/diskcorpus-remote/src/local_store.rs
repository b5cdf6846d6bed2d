use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::AsyncReadExt;

use crate::{RemoteObject, RemoteStore, url::RelativePath};

/// Default size of the chunks streamed out of a local artifact.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A `RemoteStore` serving artifacts from a directory on the local filesystem.
///
/// All artifact paths are treated as relative to the container directory, which
/// acts as a "virtual root": paths can never escape it. This is the store to use
/// for mirrored collections on a network share, and for tests.
pub struct LocalDirRemoteStore {
    /// The top-level directory of the collection.
    container_path: PathBuf,
    /// Size of the chunks produced by the body stream.
    chunk_size: usize,
}

impl LocalDirRemoteStore {
    /// Creates a new `LocalDirRemoteStore` serving the given container directory.
    pub fn new(container_path: impl Into<PathBuf>) -> LocalDirRemoteStore {
        LocalDirRemoteStore {
            container_path: container_path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the size of the chunks streamed to the caller.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> LocalDirRemoteStore {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Returns the file system path of the store's top-level container.
    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    /// Converts an artifact path to a local filesystem path within the container.
    pub fn path_of(&self, path: RelativePath) -> PathBuf {
        path.segments()
            .fold(self.container_path.clone(), |acc, segment| acc.join(segment))
    }
}

#[async_trait]
impl RemoteStore for LocalDirRemoteStore {
    async fn fetch(&self, path: RelativePath<'_>) -> std::io::Result<RemoteObject> {
        let file_path = self.path_of(path);
        let file = tokio::fs::File::open(&file_path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("'{}' is not a file", file_path.display()),
            ));
        }

        let chunk_size = self.chunk_size;
        let body = futures::stream::try_unfold(file, move |mut file| async move {
            let mut buf = BytesMut::zeroed(chunk_size);
            let n = file.read(&mut buf).await?;
            if n == 0 {
                Ok::<_, std::io::Error>(None)
            } else {
                buf.truncate(n);
                Ok(Some((buf.freeze(), file)))
            }
        })
        .boxed();

        Ok(RemoteObject {
            size: Some(metadata.len()),
            body,
        })
    }

    fn describe(&self, path: RelativePath<'_>) -> String {
        self.path_of(path).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use tempfile::TempDir;

    use crate::{RemoteStore, url::RelativePath};

    use super::LocalDirRemoteStore;

    fn create_store(chunk_size: usize) -> (LocalDirRemoteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalDirRemoteStore::new(dir.path()).with_chunk_size(chunk_size);
        (store, dir)
    }

    #[tokio::test]
    async fn test_fetch_streams_in_chunks() {
        let (store, dir) = create_store(7);
        std::fs::create_dir_all(dir.path().join("corpus/02")).unwrap();
        let content = (0..100u8).collect::<Vec<_>>();
        std::fs::write(dir.path().join("corpus/02/0002.jsonl.zst"), &content).unwrap();

        let object = store
            .fetch(RelativePath::new("corpus/02/0002.jsonl.zst").unwrap())
            .await
            .unwrap();
        assert_eq!(object.size, Some(100));
        let chunks = object.body.try_collect::<Vec<_>>().await.unwrap();
        assert!(chunks.iter().all(|c| c.len() <= 7));
        assert_eq!(chunks.concat(), content);
    }

    #[tokio::test]
    async fn test_fetch_missing_artifact() {
        let (store, _dir) = create_store(1024);
        let err = store
            .fetch(RelativePath::new("config.json").unwrap())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fetch_directory_is_not_found() {
        let (store, dir) = create_store(1024);
        std::fs::create_dir_all(dir.path().join("corpus")).unwrap();
        let err = store
            .fetch(RelativePath::new("corpus").unwrap())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_path_of() {
        let (store, dir) = create_store(1024);
        let path = store.path_of(RelativePath::new("corpus/00/0000.jsonl.offsets").unwrap());
        assert_eq!(
            path,
            dir.path()
                .join("corpus")
                .join("00")
                .join("0000.jsonl.offsets")
        );
        assert!(store.describe(RelativePath::new("config.json").unwrap()).ends_with("config.json"));
    }
}
