//! Local materialization of remote collection artifacts.
//!
//! An artifact is *present* once a non-empty file exists at its canonical local
//! path. Downloads stream into a sibling temporary file that is renamed into
//! place only after the transfer completes and is synced, so the canonical path
//! never exposes a partial file.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use ahash::AHashMap;
use diskcorpus_common::{
    Result,
    async_runtime,
    error::{Error, StdErrorShared},
};
use diskcorpus_remote::{RemoteStore, is_permanent_failure, url::RelativePath};
use futures::{
    FutureExt, TryStreamExt,
    future::{BoxFuture, Shared},
};
use tokio::io::AsyncWriteExt;

/// Suffix of in-progress download files.
pub const PARTIAL_SUFFIX: &str = "part";

type SharedDownload = Shared<BoxFuture<'static, std::result::Result<PathBuf, StdErrorShared>>>;

/// Transfer policy of a [`HydrationCache`].
#[derive(Debug, Clone)]
pub struct HydrationOptions {
    /// Total number of transfer attempts for transient failures (at least 1).
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_delay`.
    pub retry_delay: Duration,
    /// Capacity of the write buffer used when streaming to disk.
    pub chunk_size: usize,
}

impl Default for HydrationOptions {
    fn default() -> Self {
        HydrationOptions {
            max_attempts: 3,
            retry_delay: Duration::from_millis(250),
            chunk_size: 64 * 1024,
        }
    }
}

/// Ensures collection artifacts exist under a local root directory, fetching
/// each missing one from the remote store at most once at a time.
///
/// Concurrent `ensure` calls for the same artifact share a single transfer.
/// The transfer runs as a detached task: a caller that stops waiting does not
/// abort it for the others.
#[derive(Clone)]
pub struct HydrationCache {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    remote: Arc<dyn RemoteStore>,
    options: HydrationOptions,
    in_flight: Mutex<AHashMap<String, SharedDownload>>,
}

impl HydrationCache {
    pub fn new(
        root: impl Into<PathBuf>,
        remote: Arc<dyn RemoteStore>,
        options: HydrationOptions,
    ) -> HydrationCache {
        HydrationCache {
            inner: Arc::new(Inner {
                root: root.into(),
                remote,
                options,
                in_flight: Default::default(),
            }),
        }
    }

    /// Local root directory of the collection.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    /// Canonical local path of `artifact` (a `/`-separated collection-relative path
    /// without a trailing `/`).
    pub fn local_path(&self, artifact: &str) -> Result<PathBuf> {
        if artifact.ends_with('/') {
            return Err(Error::invalid_arg(
                "artifact",
                format!("'{artifact}' names a directory, not an artifact"),
            ));
        }
        let path = RelativePath::new(artifact)?;
        Ok(self.inner.local_path(path))
    }

    /// Returns `true` if the artifact is already published locally.
    pub fn is_present(&self, artifact: &str) -> bool {
        self.local_path(artifact)
            .map(|path| is_present(&path))
            .unwrap_or(false)
    }

    /// Makes `artifact` available locally and returns its canonical path.
    ///
    /// Returns immediately, without touching the remote store, if the artifact is
    /// already present. Otherwise joins the in-flight transfer for the artifact or
    /// starts a new one. Fails with `HydrationFailed` if the transfer fails; the
    /// canonical path is left absent and a later call retries.
    pub async fn ensure(&self, artifact: &str) -> Result<PathBuf> {
        let local = self.local_path(artifact)?;
        if is_present(&local) {
            log::debug!("hydration cache hit: {artifact}");
            return Ok(local);
        }

        let download = {
            let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock");
            // Re-check under the lock: a transfer may have been published since.
            if is_present(&local) {
                return Ok(local);
            }
            match in_flight.get(artifact) {
                Some(download) => download.clone(),
                None => {
                    let download = self.start_download(artifact.to_string(), local);
                    in_flight.insert(artifact.to_string(), download.clone());
                    download
                }
            }
        };

        download
            .await
            .map_err(|cause| Error::hydration_failed(artifact, cause))
    }

    /// Removes temporary files left behind by interrupted downloads.
    ///
    /// Files belonging to transfers currently in flight in this cache are kept.
    /// Returns the number of files removed.
    pub fn purge_partial_downloads(&self) -> Result<usize> {
        let root = &self.inner.root;
        if !root.is_dir() {
            return Ok(0);
        }
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .expect("in-flight lock")
            .keys()
            .filter_map(|key| RelativePath::new(key).ok())
            .map(|path| self.inner.local_path(path))
            .collect::<Vec<_>>();

        let mut removed = 0;
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let entries =
                std::fs::read_dir(&dir).map_err(|e| Error::io(dir.display().to_string(), e))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::io(dir.display().to_string(), e))?;
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .map_err(|e| Error::io(path.display().to_string(), e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(canonical) = canonical_of_partial(&path) else {
                    continue;
                };
                if in_flight.contains(&canonical) {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        log::info!("removed partial download {}", path.display());
                        removed += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
                    Err(e) => return Err(Error::io(path.display().to_string(), e)),
                }
            }
        }
        Ok(removed)
    }

    fn start_download(&self, artifact: String, local: PathBuf) -> SharedDownload {
        let inner = self.inner.clone();
        let handle = async_runtime::spawn(async move {
            let result = inner.download(&artifact, &local).await;
            inner
                .in_flight
                .lock()
                .expect("in-flight lock")
                .remove(&artifact);
            result.map(|()| local)
        });
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(std::io::Error::other(e)) as StdErrorShared),
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    fn local_path(&self, path: RelativePath) -> PathBuf {
        path.segments()
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    /// Runs the transfer with bounded retries of transient failures.
    async fn download(
        &self,
        artifact: &str,
        local: &Path,
    ) -> std::result::Result<(), StdErrorShared> {
        let path = RelativePath::new(artifact).map_err(|e| Arc::new(e) as StdErrorShared)?;
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            match self.transfer(path, local).await {
                Ok(size) => {
                    log::info!(
                        "downloaded {} ({size} bytes) in {:?}",
                        self.remote.describe(path),
                        started.elapsed()
                    );
                    return Ok(());
                }
                Err(e) if attempt >= max_attempts || is_permanent_failure(&e) => {
                    log::error!("failed to download {}: {e}", self.remote.describe(path));
                    return Err(Arc::new(e));
                }
                Err(e) => {
                    log::warn!(
                        "download of {} failed (attempt {attempt} of {max_attempts}): {e}",
                        self.remote.describe(path)
                    );
                    tokio::time::sleep(self.options.retry_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Streams the artifact into a temporary sibling of `local` and publishes it.
    async fn transfer(&self, path: RelativePath<'_>, local: &Path) -> std::io::Result<u64> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = partial_path_for(local);
        let result = self.transfer_to(path, &temp).await;
        match result {
            Ok(size) => {
                tokio::fs::rename(&temp, local).await.inspect_err(|_| {
                    let _ = std::fs::remove_file(&temp);
                })?;
                Ok(size)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                Err(e)
            }
        }
    }

    async fn transfer_to(&self, path: RelativePath<'_>, temp: &Path) -> std::io::Result<u64> {
        let mut object = self.remote.fetch(path).await?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp)
            .await?;
        let mut writer = tokio::io::BufWriter::with_capacity(self.options.chunk_size.max(1), file);
        let mut written = 0u64;
        while let Some(chunk) = object.body.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_all().await?;

        if let Some(size) = object.size
            && size != written
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("transfer ended after {written} of {size} bytes"),
            ));
        }
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "artifact body is empty",
            ));
        }
        Ok(written)
    }
}

fn is_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false)
}

/// `{dir}/{name}` -> `{dir}/{name}.{8 hex digits}.part`
fn partial_path_for(local: &Path) -> PathBuf {
    let mut name = local.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{:08x}.{PARTIAL_SUFFIX}", fastrand::u32(..)));
    local.with_file_name(name)
}

/// Returns the canonical path a partial download file belongs to.
fn canonical_of_partial(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(PARTIAL_SUFFIX)?.strip_suffix('.')?;
    let (canonical, tag) = stem.rsplit_once('.')?;
    if canonical.is_empty() || tag.len() != 8 || !tag.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(path.with_file_name(canonical))
}
