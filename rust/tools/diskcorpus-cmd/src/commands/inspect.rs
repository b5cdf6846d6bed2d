//! Inspect command implementation

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use diskcorpus_store::{
    CorpusConfig,
    config::CONFIG_FILE_NAME,
    layout::{CORPUS_FOLDER, DATA_FILE_EXTENSION, OFFSETS_FILE_EXTENSION},
    read::{CompressedRandomAccessReader, OffsetIndex},
};
use serde::Serialize;

#[derive(Serialize)]
struct CollectionInfo {
    config: CorpusConfig,
    local_shards: usize,
    shards: Vec<ShardInfo>,
}

#[derive(Serialize)]
struct ShardInfo {
    data_file: String,
    compressed_size: u64,
    decompressed_size: u64,
    frame_count: usize,
    has_checksums: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<u64>,
}

pub fn run(path: String) -> Result<()> {
    let path = PathBuf::from(path);
    let output = if path.is_dir() {
        serde_json::to_string_pretty(&inspect_collection(&path)?)?
    } else {
        serde_json::to_string_pretty(&inspect_shard(&path)?)?
    };
    println!("{output}");
    Ok(())
}

fn inspect_collection(root: &Path) -> Result<CollectionInfo> {
    let config = CorpusConfig::load(&root.join(CONFIG_FILE_NAME))
        .with_context(|| format!("Failed to load config of {}", root.display()))?;
    let mut data_files = Vec::new();
    collect_data_files(&root.join(CORPUS_FOLDER), &mut data_files)?;
    data_files.sort();
    let shards = data_files
        .iter()
        .map(|file| inspect_shard(file))
        .collect::<Result<Vec<_>>>()?;
    Ok(CollectionInfo {
        config,
        local_shards: shards.len(),
        shards,
    })
}

fn collect_data_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_data_files(&path, files)?;
        } else if is_data_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_data_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(&format!(".{DATA_FILE_EXTENSION}")))
}

/// Path of the offsets table next to a shard data file.
fn offsets_path_for(data_file: &Path) -> Option<PathBuf> {
    let name = data_file.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{DATA_FILE_EXTENSION}"))?;
    Some(data_file.with_file_name(format!("{stem}.{OFFSETS_FILE_EXTENSION}")))
}

fn inspect_shard(data_file: &Path) -> Result<ShardInfo> {
    let compressed_size = std::fs::metadata(data_file)
        .with_context(|| format!("Failed to stat {}", data_file.display()))?
        .len();
    let reader = CompressedRandomAccessReader::open(data_file)
        .with_context(|| format!("Failed to open shard {}", data_file.display()))?;
    let records = match offsets_path_for(data_file) {
        Some(offsets) if offsets.is_file() => Some(OffsetIndex::open(&offsets)?.len()),
        _ => None,
    };
    Ok(ShardInfo {
        data_file: data_file.display().to_string(),
        compressed_size,
        decompressed_size: reader.decompressed_size(),
        frame_count: reader.frame_count(),
        has_checksums: reader.seek_table().has_checksums(),
        records,
    })
}
