//! The corpus store: resolves ANN hits into decoded documents, hydrating shard
//! artifacts from the remote collection on first use.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use ahash::AHashMap;
use bytes::Bytes;
use diskcorpus_common::{
    Result,
    async_runtime::spawn_blocking,
    error::{Error, ErrorKind},
};
use diskcorpus_remote::{
    RemoteStore,
    http_store::{DEFAULT_BASE_URL, DEFAULT_REVISION, HttpRemoteStore},
    offline_store::OfflineStore,
};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;

use crate::{
    config::{CONFIG_FILE_NAME, CorpusConfig},
    handle_cache::{ShardHandle, ShardHandleCache},
    hydration::{HydrationCache, HydrationOptions},
    layout::{CorpusLayout, GlobalDocId},
    read::{CompressedRandomAccessReader, OffsetIndex},
};

/// Options of [`CorpusStore::open`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Parent directory of the local copies of remote collections.
    pub cache_dir: PathBuf,
    /// Base URL of the dataset hub serving remote collections.
    pub base_url: String,
    pub revision: String,
    /// Maximum number of shards kept open at once.
    pub max_open_shards: usize,
    /// Maximum number of documents resolved concurrently within one batch.
    pub parallelism: usize,
    /// Whether to hydrate the ANN index artifact when the store is opened.
    pub hydrate_index: bool,
    pub hydration: HydrationOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            cache_dir: PathBuf::from("index_cache"),
            base_url: DEFAULT_BASE_URL.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            max_open_shards: 64,
            parallelism: 16,
            hydrate_index: true,
            hydration: HydrationOptions::default(),
        }
    }
}

impl StoreOptions {
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn with_max_open_shards(mut self, max_open_shards: usize) -> Self {
        self.max_open_shards = max_open_shards;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_hydrate_index(mut self, hydrate_index: bool) -> Self {
        self.hydrate_index = hydrate_index;
        self
    }

    pub fn with_hydration(mut self, hydration: HydrationOptions) -> Self {
        self.hydration = hydration;
        self
    }
}

/// A document resolved from the corpus, paired with the score of the hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRecord {
    pub id: GlobalDocId,
    pub doc: serde_json::Value,
    pub score: f32,
}

/// Disk-resident document corpus with lazy remote hydration.
///
/// Shards are hydrated on first access and their handles are kept in a bounded
/// registry owned by the store. All methods take `&self`; a store can be shared
/// between any number of concurrent callers.
pub struct CorpusStore {
    hydration: HydrationCache,
    config: CorpusConfig,
    layout: CorpusLayout,
    handles: ShardHandleCache,
    /// Per-shard gates serializing concurrent opens of the same shard.
    open_gates: Mutex<AHashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
    shard_opens: AtomicU64,
    parallelism: usize,
}

impl CorpusStore {
    /// Opens a corpus.
    ///
    /// `source` is either an existing local collection directory, used as is
    /// without any remote, or a remote collection id `org/name` whose artifacts
    /// are hydrated into `{cache_dir}/org_name`.
    pub async fn open(source: &str, options: StoreOptions) -> Result<CorpusStore> {
        let local = Path::new(source);
        if local.is_dir() {
            log::info!("opening local corpus {}", local.display());
            return Self::open_with_remote(local, Arc::new(OfflineStore), options).await;
        }

        let mut parts = source.split('/');
        let valid_id = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(org), Some(name), None) if !org.is_empty() && !name.is_empty()
        );
        if !valid_id {
            return Err(Error::invalid_arg(
                "source",
                format!("'{source}' is neither a directory nor a collection id 'org/name'"),
            ));
        }
        let remote =
            HttpRemoteStore::for_collection(&options.base_url, source, &options.revision)?;
        log::info!("opening remote corpus {}", remote.container().as_str());
        let root = options.cache_dir.join(source.replace('/', "_"));
        Self::open_with_remote(root, Arc::new(remote), options).await
    }

    /// Opens a corpus whose local copy lives in `root`, hydrating missing
    /// artifacts from `remote`.
    pub async fn open_with_remote(
        root: impl Into<PathBuf>,
        remote: Arc<dyn RemoteStore>,
        options: StoreOptions,
    ) -> Result<CorpusStore> {
        let hydration = HydrationCache::new(root, remote, options.hydration.clone());
        let config_path = match hydration.ensure(CONFIG_FILE_NAME).await {
            Ok(path) => path,
            Err(e) if is_not_found(&e) => {
                let path = hydration.local_path(CONFIG_FILE_NAME)?;
                return Err(ErrorKind::ConfigMissing {
                    path: path.display().to_string(),
                }
                .into());
            }
            Err(e) => return Err(e),
        };
        let config = CorpusConfig::load(&config_path)?;
        let layout = config.layout()?;
        log::info!(
            "corpus layout: {} docs per shard, shard id width {}, folder depth {}, size {:?}",
            layout.docs_per_shard(),
            layout.shard_id_width(),
            layout.shard_folder_depth(),
            config.corpus_size
        );

        let store = CorpusStore {
            hydration,
            config,
            layout,
            handles: ShardHandleCache::new(options.max_open_shards),
            open_gates: Default::default(),
            shard_opens: AtomicU64::new(0),
            parallelism: options.parallelism.max(1),
        };
        if options.hydrate_index {
            let index_path = store.ensure_index().await?;
            log::info!("ANN index at {}", index_path.display());
        }
        Ok(store)
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    pub fn layout(&self) -> &CorpusLayout {
        &self.layout
    }

    pub fn hydration(&self) -> &HydrationCache {
        &self.hydration
    }

    /// Local root directory of the collection.
    pub fn root(&self) -> &Path {
        self.hydration.root()
    }

    /// Total number of documents, if recorded in the config.
    pub fn corpus_size(&self) -> Option<u64> {
        self.config.corpus_size
    }

    /// Local path of the ANN index artifact (which may not be hydrated yet).
    pub fn index_path(&self) -> Result<PathBuf> {
        self.hydration.local_path(self.layout.index_file_name())
    }

    /// Hydrates the ANN index artifact and returns its local path.
    pub async fn ensure_index(&self) -> Result<PathBuf> {
        self.hydration.ensure(self.layout.index_file_name()).await
    }

    /// Resolves hits into decoded documents, in input order, failing on the first
    /// error.
    pub async fn resolve(&self, hits: &[(GlobalDocId, f32)]) -> Result<Vec<DecodedRecord>> {
        let started = Instant::now();
        let records = stream::iter(hits.iter().copied())
            .map(|(id, score)| self.read_record(id, score))
            .buffered(self.parallelism)
            .try_collect::<Vec<_>>()
            .await?;
        log_batch(records.len(), started.elapsed());
        Ok(records)
    }

    /// Resolves hits into decoded documents, in input order, reporting failures
    /// per hit.
    pub async fn resolve_best_effort(
        &self,
        hits: &[(GlobalDocId, f32)],
    ) -> Vec<Result<DecodedRecord>> {
        let started = Instant::now();
        let results = stream::iter(hits.iter().copied())
            .map(|(id, score)| self.read_record(id, score))
            .buffered(self.parallelism)
            .collect::<Vec<_>>()
            .await;
        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed > 0 {
            log::warn!("{failed} of {} hits failed to resolve", results.len());
        }
        log_batch(results.len(), started.elapsed());
        results
    }

    /// Reads the raw bytes of a single document.
    pub async fn read_raw(&self, id: GlobalDocId) -> Result<Bytes> {
        let (handle, inner, offset) = self.locate_record(id).await?;
        spawn_blocking(move || read_located(&handle, inner, offset))
            .await
            .map_err(join_error)?
    }

    /// Reads and decodes a single document.
    pub async fn read_record(&self, id: GlobalDocId, score: f32) -> Result<DecodedRecord> {
        let (handle, inner, offset) = self.locate_record(id).await?;
        spawn_blocking(move || -> Result<DecodedRecord> {
            let raw = read_located(&handle, inner, offset)?;
            let doc = serde_json::from_slice(&raw)
                .map_err(|e| Error::decode(handle.reader.shard(), offset, e))?;
            Ok(DecodedRecord { id, doc, score })
        })
        .await
        .map_err(join_error)?
    }

    /// Releases all open shard handles. Handles in use by in-flight reads stay
    /// open until those reads complete.
    pub fn close(&self) {
        self.handles.clear();
    }

    /// Number of currently open shards.
    pub fn open_shards(&self) -> usize {
        self.handles.len()
    }

    /// Total number of shard opens performed by this store, including reopens
    /// after eviction.
    pub fn shard_opens(&self) -> u64 {
        self.shard_opens.load(Ordering::Relaxed)
    }

    /// Returns the shard handle, the in-shard index and the decompressed offset
    /// of document `id`.
    async fn locate_record(&self, id: GlobalDocId) -> Result<(Arc<ShardHandle>, u64, u64)> {
        if let Some(size) = self.config.corpus_size
            && id >= size
        {
            return Err(Error::offset_out_of_range(id, size));
        }
        let location = self.layout.locate(id);
        let handle = self.shard_handle(location.shard_id).await?;
        let offset = handle.offsets.offset_of(location.inner_offset).map_err(|e| {
            if e.is_out_of_range() {
                let limit =
                    location.shard_id * self.layout.docs_per_shard() + handle.offsets.len();
                Error::offset_out_of_range(id, limit)
            } else {
                e
            }
        })?;
        Ok((handle, location.inner_offset, offset))
    }

    async fn shard_handle(&self, shard_id: u64) -> Result<Arc<ShardHandle>> {
        if let Some(handle) = self.handles.get(shard_id) {
            return Ok(handle);
        }
        let gate = self
            .open_gates
            .lock()
            .expect("open gates lock")
            .entry(shard_id)
            .or_default()
            .clone();
        let result = {
            let _open = gate.lock().await;
            match self.handles.get(shard_id) {
                Some(handle) => Ok(handle),
                None => self.open_shard(shard_id).await,
            }
        };
        let mut gates = self.open_gates.lock().expect("open gates lock");
        // The map and this call hold the only references once nobody else waits.
        if Arc::strong_count(&gate) <= 2 {
            gates.remove(&shard_id);
        }
        result
    }

    async fn open_shard(&self, shard_id: u64) -> Result<Arc<ShardHandle>> {
        let data_artifact = self.layout.data_path(shard_id);
        let offsets_artifact = self.layout.offsets_path(shard_id);
        let (data_path, offsets_path) = futures::try_join!(
            self.hydration.ensure(&data_artifact),
            self.hydration.ensure(&offsets_artifact),
        )?;
        let handle = spawn_blocking(move || -> Result<ShardHandle> {
            Ok(ShardHandle {
                shard_id,
                offsets: OffsetIndex::open(&offsets_path)?,
                reader: CompressedRandomAccessReader::open(&data_path)?,
            })
        })
        .await
        .map_err(join_error)??;
        self.shard_opens.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "opened shard {shard_id}: {} records, {} frames",
            handle.offsets.len(),
            handle.reader.frame_count()
        );
        Ok(self.handles.insert(handle))
    }
}

impl Drop for CorpusStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reads the record at `offset`, the offsets table entry of record `inner`.
///
/// An entry pointing past the end of the data stream means the two shard
/// artifacts disagree.
fn read_located(handle: &ShardHandle, inner: u64, offset: u64) -> Result<Bytes> {
    handle.reader.read_record_at(offset).map_err(|e| {
        if e.is_out_of_range() {
            Error::corrupt_shard(
                handle.reader.shard(),
                format!(
                    "offset table entry for record {inner} ({offset}) points past the end \
                     of the stream ({} bytes)",
                    handle.reader.decompressed_size()
                ),
            )
        } else {
            e
        }
    })
}

fn log_batch(count: usize, elapsed: Duration) {
    log::info!("resolved {count} documents in {elapsed:?}");
}

fn join_error(e: diskcorpus_common::async_runtime::JoinError) -> Error {
    Error::io("blocking task", std::io::Error::other(e))
}

fn is_not_found(e: &Error) -> bool {
    match e.kind() {
        ErrorKind::HydrationFailed { cause, .. } => cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound),
        _ => false,
    }
}
