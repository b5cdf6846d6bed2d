use std::sync::Arc;

use async_trait::async_trait;
use diskcorpus_common::{Result, error::Error, error::ErrorKind};
use tempfile::TempDir;

use super::corpus_fixture::{
    CorpusFixture, INDEX_FILE_NAME, TestRemote, build_corpus, doc_text, list_files, test_options,
};
use crate::{
    config::CONFIG_FILE_NAME,
    corpus::CorpusStore,
    layout::GlobalDocId,
    read::offsets::{OffsetIndex, encode_npy_u64},
    search::{AnnEngine, DiskSearch, EmbeddingProvider},
    write::{ShardWriter, artifact_writer::LocalArtifact, shard_writer::write_offsets},
};

fn expected_doc(id: u64) -> serde_json::Value {
    serde_json::json!({ "id": id, "text": doc_text(id) })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_hydrates_config_and_index() {
    let fixture = CorpusFixture::new(250, 100);
    let store = fixture.open().await;
    assert_eq!(store.corpus_size(), Some(250));
    assert_eq!(store.layout().docs_per_shard(), 100);
    assert_eq!(fixture.remote.fetch_count(CONFIG_FILE_NAME), 1);
    assert_eq!(fixture.remote.fetch_count(INDEX_FILE_NAME), 1);
    assert_eq!(
        store.index_path().unwrap(),
        fixture.cache_dir.path().join(INDEX_FILE_NAME)
    );
    assert!(store.index_path().unwrap().is_file());
    assert_eq!(store.open_shards(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_roundtrip_every_document() {
    let fixture = CorpusFixture::new(250, 100);
    let store = fixture.open().await;
    let hits = (0..250).map(|id| (id, id as f32 / 10.0)).collect::<Vec<_>>();
    let records = store.resolve(&hits).await.unwrap();
    assert_eq!(records.len(), 250);
    for (record, &(id, score)) in records.iter().zip(&hits) {
        assert_eq!(record.id, id);
        assert_eq!(record.score, score);
        assert_eq!(record.doc, expected_doc(id));
    }
    assert_eq!(store.open_shards(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolve_preserves_order_and_scores() {
    let fixture = CorpusFixture::new(250, 100);
    let store = fixture.open().await;
    let hits = [(201, 0.9), (3, 0.5), (150, 0.25), (3, 0.1)];
    let records = store.resolve(&hits).await.unwrap();
    let got = records
        .iter()
        .map(|r| (r.id, r.score, r.doc["id"].as_u64().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(
        got,
        vec![(201, 0.9, 201), (3, 0.5, 3), (150, 0.25, 150), (3, 0.1, 3)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ids_beyond_corpus_are_out_of_range() {
    let fixture = CorpusFixture::new(250, 100);
    let store = fixture.open().await;
    for id in [250, 299, 300, 10_000] {
        let err = store.read_raw(id).await.unwrap_err();
        match err.kind() {
            ErrorKind::OffsetOutOfRange { id: bad, limit } => {
                assert_eq!(*bad, id);
                assert_eq!(*limit, 250);
            }
            kind => panic!("unexpected kind {kind:?}"),
        }
    }
    // Rejected before any shard was hydrated.
    assert_eq!(fixture.remote.total_fetches(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_last_shard_without_recorded_size() {
    let fixture = CorpusFixture::new(250, 100);
    let mut config = fixture.config.clone();
    config.corpus_size = None;
    std::fs::write(
        fixture.remote_dir.path().join(CONFIG_FILE_NAME),
        config.to_json(),
    )
    .unwrap();

    let store = fixture.open().await;
    assert_eq!(store.corpus_size(), None);
    let err = store.read_raw(250).await.unwrap_err();
    match err.kind() {
        ErrorKind::OffsetOutOfRange { id, limit } => assert_eq!((*id, *limit), (250, 250)),
        kind => panic!("unexpected kind {kind:?}"),
    }
    let err = store.read_raw(300).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::HydrationFailed { .. }));
    assert!(!store.read_raw(249).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fail_fast_and_best_effort() {
    let fixture = CorpusFixture::new(250, 100);
    let store = fixture.open().await;
    let hits = [(5, 1.0), (400, 0.8), (120, 0.6)];

    let err = store.resolve(&hits).await.unwrap_err();
    assert!(err.is_out_of_range());

    let results = store.resolve_best_effort(&hits).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().doc, expected_doc(5));
    assert!(results[1].as_ref().unwrap_err().is_out_of_range());
    assert_eq!(results[2].as_ref().unwrap().score, 0.6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hydrated_cache_needs_no_network() {
    let fixture = CorpusFixture::new(250, 100);
    let hits = [(0, 1.0), (120, 0.5), (249, 0.1)];
    {
        let store = fixture.open().await;
        store.resolve(&hits).await.unwrap();
    }
    let after_first_run = fixture.remote.total_fetches();
    assert_eq!(after_first_run, 2 + 3 * 2);

    let store = fixture.open().await;
    let records = store.resolve(&hits).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(fixture.remote.total_fetches(), after_first_run);

    // The local copy now works without any remote at all.
    let offline = CorpusStore::open(
        fixture.cache_dir.path().to_str().unwrap(),
        test_options(fixture.cache_dir.path()),
    )
    .await
    .unwrap();
    assert_eq!(offline.resolve(&hits).await.unwrap(), records);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_resolves_share_shard_transfers() {
    let fixture = CorpusFixture::new(250, 100);
    fixture.remote.set_delay(std::time::Duration::from_millis(20));
    let store = Arc::new(fixture.open().await);
    let tasks = (0..12u64)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.resolve(&[(i * 7, 1.0), (100 + i, 0.5)]).await })
        })
        .collect::<Vec<_>>();
    for (i, result) in futures::future::join_all(tasks).await.into_iter().enumerate() {
        let records = result.unwrap().unwrap();
        assert_eq!(records[0].doc, expected_doc(i as u64 * 7));
        assert_eq!(records[1].doc, expected_doc(100 + i as u64));
    }
    assert_eq!(fixture.remote.fetch_count("corpus/00/0000.jsonl.zst"), 1);
    assert_eq!(fixture.remote.fetch_count("corpus/01/0001.jsonl.offsets"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bounded_shard_handles() {
    let fixture = CorpusFixture::new(500, 50);
    let store = fixture
        .open_with(test_options(fixture.cache_dir.path()).with_max_open_shards(3))
        .await;
    let hits = (0..10).map(|shard| (shard * 50 + 1, 1.0)).collect::<Vec<_>>();
    let records = store.resolve(&hits).await.unwrap();
    assert_eq!(records.len(), 10);
    assert!(store.open_shards() <= 3);

    // Evicted shards reopen from the local cache.
    let record = store.read_record(1, 0.0).await.unwrap();
    assert_eq!(record.doc, expected_doc(1));
    assert_eq!(fixture.remote.fetch_count("corpus/00/0000.jsonl.zst"), 1);

    store.close();
    assert_eq!(store.open_shards(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_record_is_decode_error() {
    let fixture = CorpusFixture::new(10, 10);
    let shard_dir = fixture.remote_dir.path().join("corpus/00");
    std::fs::remove_file(shard_dir.join("0000.jsonl.zst")).unwrap();
    std::fs::remove_file(shard_dir.join("0000.jsonl.offsets")).unwrap();

    let (data, writer) = LocalArtifact::create(shard_dir.join("0000.jsonl.zst")).unwrap();
    let mut shard = ShardWriter::new(writer, Default::default()).unwrap();
    shard.push_record(br#"{"id": 0}"#).unwrap();
    shard.push_record(b"{truncated").unwrap();
    let summary = shard.finish().unwrap();
    data.publish().unwrap();
    let (offsets, writer) = LocalArtifact::create(shard_dir.join("0000.jsonl.offsets")).unwrap();
    write_offsets(writer, &summary.offsets).unwrap();
    offsets.publish().unwrap();

    let store = fixture.open().await;
    assert_eq!(store.read_record(0, 1.0).await.unwrap().doc["id"], 0);
    let err = store.read_record(1, 1.0).await.unwrap_err();
    match err.kind() {
        ErrorKind::DecodeError { shard, offset, .. } => {
            assert!(shard.ends_with("0000.jsonl.zst"));
            assert_eq!(*offset, 10);
        }
        kind => panic!("unexpected kind {kind:?}"),
    }
    assert_eq!(store.read_raw(1).await.unwrap().as_ref(), b"{truncated");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_offset_past_stream_end_is_corrupt_shard() {
    let fixture = CorpusFixture::new(10, 10);
    let offsets_path = fixture.remote_dir.path().join("corpus/00/0000.jsonl.offsets");
    let table = OffsetIndex::open(&offsets_path).unwrap();
    let mut offsets = (0..table.len())
        .map(|i| table.offset_of(i).unwrap())
        .collect::<Vec<_>>();
    drop(table);
    offsets[3] = 987_654;
    std::fs::write(&offsets_path, encode_npy_u64(&offsets)).unwrap();

    let store = fixture.open().await;
    assert_eq!(store.read_record(2, 1.0).await.unwrap().doc, expected_doc(2));
    let err = store.read_record(3, 1.0).await.unwrap_err();
    assert!(!err.is_out_of_range());
    match err.kind() {
        ErrorKind::CorruptShard { shard, message } => {
            assert!(shard.ends_with("0000.jsonl.zst"), "{shard}");
            assert!(message.contains("record 3"), "{message}");
            assert!(message.contains("987654"), "{message}");
        }
        kind => panic!("unexpected kind {kind:?}"),
    }
    let err = store.read_raw(3).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CorruptShard { .. }), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_reads_open_shard_once() {
    let fixture = CorpusFixture::new(250, 100);
    fixture.remote.set_delay(std::time::Duration::from_millis(20));
    let store = Arc::new(fixture.open().await);
    let tasks = (0..16u64)
        .map(|id| {
            let store = store.clone();
            tokio::spawn(async move { store.read_record(id, 1.0).await })
        })
        .collect::<Vec<_>>();
    for (id, result) in futures::future::join_all(tasks).await.into_iter().enumerate() {
        assert_eq!(result.unwrap().unwrap().doc, expected_doc(id as u64));
    }
    assert_eq!(store.shard_opens(), 1);
    assert_eq!(store.open_shards(), 1);

    assert_eq!(store.read_record(100, 1.0).await.unwrap().doc, expected_doc(100));
    assert_eq!(store.shard_opens(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_requires_model() {
    let mut fixture = CorpusFixture::new(20, 10);
    fixture.config.model = None;
    std::fs::write(
        fixture.remote_dir.path().join(CONFIG_FILE_NAME),
        fixture.config.to_json(),
    )
    .unwrap();
    let store = Arc::new(fixture.open().await);
    assert_eq!(store.read_record(0, 1.0).await.unwrap().doc, expected_doc(0));
    let err = DiskSearch::new(store, Arc::new(FixedEmbedder), Arc::new(CountdownEngine))
        .err()
        .unwrap();
    match err.kind() {
        ErrorKind::InvalidConfig { path, message } => {
            assert!(path.ends_with(CONFIG_FILE_NAME), "{path}");
            assert!(message.contains("embedding model"), "{message}");
        }
        kind => panic!("unexpected kind {kind:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_config() {
    let remote_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let remote = TestRemote::new(remote_dir.path());
    let err = CorpusStore::open_with_remote(
        cache_dir.path(),
        remote.clone(),
        test_options(cache_dir.path()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err.kind(), ErrorKind::ConfigMissing { .. }));
    assert_eq!(remote.fetch_count(CONFIG_FILE_NAME), 1);
    assert!(list_files(cache_dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_rejects_bad_source() {
    let cache_dir = TempDir::new().unwrap();
    for source in ["", "justaname", "a/b/c", "/org"] {
        let err = CorpusStore::open(source, test_options(cache_dir.path()))
            .await
            .err()
            .unwrap();
        assert!(
            matches!(err.kind(), ErrorKind::InvalidArgument { .. }),
            "{source}: {err}"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_local_directory() {
    let dir = TempDir::new().unwrap();
    build_corpus(dir.path(), 30, 10);
    let store = CorpusStore::open(
        dir.path().to_str().unwrap(),
        test_options(dir.path()).with_hydrate_index(false),
    )
    .await
    .unwrap();
    let records = store.resolve(&[(29, 0.3), (0, 0.1)]).await.unwrap();
    assert_eq!(records[0].doc, expected_doc(29));
    assert_eq!(records[1].doc, expected_doc(0));
}

struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, text: &str, model: &str, embedding_type: &str) -> Result<Vec<f32>> {
        assert_eq!(model, "embed-english-v3.0");
        assert_eq!(embedding_type, "float");
        if text.is_empty() {
            return Err(Error::embedding_provider("empty query"));
        }
        Ok(vec![text.len() as f32])
    }
}

/// Returns every 11th id starting from ten times the "vector" value.
struct CountdownEngine;

impl AnnEngine for CountdownEngine {
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(GlobalDocId, f32)>> {
        let start = query[0] as u64;
        if start > 1000 {
            return Err(Error::ann_engine("query out of bounds"));
        }
        Ok((0..top_k as u64)
            .map(|i| (start * 10 + i * 11, 1.0 - i as f32 / 10.0))
            .collect())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_orchestration() {
    let fixture = CorpusFixture::new(250, 100);
    let store = Arc::new(fixture.open().await);
    let search = DiskSearch::new(store, Arc::new(FixedEmbedder), Arc::new(CountdownEngine))
        .unwrap();

    let records = search.search("abcd", 3).await.unwrap();
    let ids = records.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids, vec![40, 51, 62]);
    assert_eq!(records[0].score, 1.0);
    assert_eq!(records[2].doc, expected_doc(62));

    let err = search.search("", 3).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::EmbeddingProviderError { .. }));

    let long_query = "x".repeat(2000);
    let err = search.search(&long_query, 3).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::AnnEngineError { .. }));

    let results = search.search_best_effort("a".repeat(24).as_str(), 2).await.unwrap();
    assert_eq!(results[0].as_ref().unwrap().id, 240);
    assert!(results[1].as_ref().unwrap_err().is_out_of_range());
}
