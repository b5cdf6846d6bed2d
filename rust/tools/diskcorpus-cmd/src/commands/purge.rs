//! Purge command implementation

use std::sync::Arc;

use anyhow::Result;
use diskcorpus_remote::offline_store::OfflineStore;
use diskcorpus_store::HydrationCache;

pub fn run(path: String) -> Result<()> {
    let root = std::path::Path::new(&path);
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", path);
    }
    let cache = HydrationCache::new(root, Arc::new(OfflineStore), Default::default());
    let removed = cache.purge_partial_downloads()?;
    println!("Removed {removed} partial downloads from {path}");
    Ok(())
}
