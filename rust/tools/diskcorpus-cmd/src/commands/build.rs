//! Build command implementation

use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use diskcorpus_store::{
    CorpusConfig,
    write::{CorpusBuilder, ShardWriterOptions},
};

use crate::utils::{format_size, validate_file_exists};

pub struct BuildArgs {
    pub file: String,
    pub docs_per_shard: u64,
    pub shard_id_width: u32,
    pub folder_depth: u32,
    pub index: String,
    pub model: Option<String>,
    pub frame_size: usize,
    pub output: String,
}

pub fn run(args: BuildArgs) -> Result<()> {
    validate_file_exists(&args.file)?;
    let config = CorpusConfig {
        index: args.index,
        model: args.model,
        embedding_type: "float".to_string(),
        corpus_num_lines: args.docs_per_shard,
        corpus_file_len: args.shard_id_width,
        corpus_folder_len: args.folder_depth,
        corpus_size: None,
    };
    let options = ShardWriterOptions {
        frame_size: args.frame_size,
        ..Default::default()
    };
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {}", args.output))?;

    let mut builder = CorpusBuilder::new(&args.output, config, options)
        .context("Invalid corpus layout parameters")?;

    let file = std::fs::File::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file))?;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        builder
            .push_line(&line)
            .with_context(|| format!("Invalid document at line {}", line_no + 1))?;
    }

    let summary = builder.finish()?;
    println!(
        "Built {} documents in {} shards ({}) at {}",
        summary.config.corpus_size.unwrap_or(0),
        summary.shards,
        format_size(summary.compressed_size),
        args.output
    );
    Ok(())
}
