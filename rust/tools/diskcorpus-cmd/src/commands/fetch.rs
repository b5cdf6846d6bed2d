//! Fetch command implementation

use anyhow::{Context, Result};
use diskcorpus_store::{CorpusStore, StoreOptions};
use serde::Serialize;

use crate::utils::parse_hit;

pub struct FetchArgs {
    pub source: String,
    pub hits: Vec<String>,
    pub cache_dir: String,
    pub base_url: Option<String>,
    pub revision: Option<String>,
    pub best_effort: bool,
    pub raw: bool,
}

#[derive(Serialize)]
struct FailedHit {
    id: u64,
    error: String,
}

pub async fn run(args: FetchArgs) -> Result<()> {
    let hits = args
        .hits
        .iter()
        .map(|hit| parse_hit(hit))
        .collect::<Result<Vec<_>>>()?;

    let mut options = StoreOptions::default()
        .with_cache_dir(&args.cache_dir)
        .with_hydrate_index(false);
    if let Some(base_url) = args.base_url {
        options = options.with_base_url(base_url);
    }
    if let Some(revision) = args.revision {
        options = options.with_revision(revision);
    }

    let store = CorpusStore::open(&args.source, options)
        .await
        .with_context(|| format!("Failed to open corpus {}", args.source))?;
    log::info!(
        "opened corpus {} at {} ({} documents per shard)",
        args.source,
        store.root().display(),
        store.layout().docs_per_shard()
    );

    if args.raw {
        for (id, _) in &hits {
            let record = store.read_raw(*id).await?;
            println!("{}", String::from_utf8_lossy(&record));
        }
        return Ok(());
    }

    if args.best_effort {
        let results = store.resolve_best_effort(&hits).await;
        for ((id, _), result) in hits.iter().zip(results) {
            let line = match result {
                Ok(record) => serde_json::to_string(&record)?,
                Err(e) => serde_json::to_string(&FailedHit {
                    id: *id,
                    error: e.to_string(),
                })?,
            };
            println!("{line}");
        }
    } else {
        for record in store.resolve(&hits).await? {
            println!("{}", serde_json::to_string(&record)?);
        }
    }
    Ok(())
}
