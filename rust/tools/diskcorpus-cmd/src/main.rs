use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod utils;

#[derive(Parser)]
#[command(name = "diskcorpus-cmd")]
#[command(about = "Command-line utility for disk-resident corpus collections")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a corpus collection from a JSON lines file
    Build {
        /// Source file with one JSON document per line
        #[arg(short, long)]
        file: String,

        /// Number of documents per shard
        #[arg(long, default_value_t = 1000)]
        docs_per_shard: u64,

        /// Zero-padded width of shard ids
        #[arg(long, default_value_t = 4)]
        shard_id_width: u32,

        /// Number of trailing shard id digits used as the shard folder name
        #[arg(long, default_value_t = 2)]
        folder_depth: u32,

        /// File name of the ANN index artifact recorded in the config
        #[arg(long, default_value = "index.faiss")]
        index: String,

        /// Embedding model recorded in the config
        #[arg(long)]
        model: Option<String>,

        /// Decompressed size of a compressed frame, in bytes
        #[arg(long, default_value_t = 256 * 1024)]
        frame_size: usize,

        /// Output collection directory
        output: String,
    },

    /// Resolve document ids against a local or remote collection
    Fetch {
        /// Local collection directory or remote collection id `org/name`
        source: String,

        /// Hits to resolve, as `id` or `id:score`
        #[arg(required = true)]
        hits: Vec<String>,

        /// Local cache directory for remote collections
        #[arg(long, default_value = "index_cache")]
        cache_dir: String,

        /// Base URL of the dataset hub
        #[arg(long)]
        base_url: Option<String>,

        /// Collection revision
        #[arg(long)]
        revision: Option<String>,

        /// Report failures per hit instead of stopping at the first one
        #[arg(long)]
        best_effort: bool,

        /// Print raw records instead of decoded documents
        #[arg(long)]
        raw: bool,
    },

    /// Inspect a collection directory or a single shard data file
    Inspect {
        /// Collection directory or `.jsonl.zst` shard path
        path: String,
    },

    /// Remove partial downloads left behind by interrupted transfers
    Purge {
        /// Local collection directory
        path: String,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            file,
            docs_per_shard,
            shard_id_width,
            folder_depth,
            index,
            model,
            frame_size,
            output,
        } => commands::build::run(commands::build::BuildArgs {
            file,
            docs_per_shard,
            shard_id_width,
            folder_depth,
            index,
            model,
            frame_size,
            output,
        }),
        Commands::Fetch {
            source,
            hits,
            cache_dir,
            base_url,
            revision,
            best_effort,
            raw,
        } => {
            commands::fetch::run(commands::fetch::FetchArgs {
                source,
                hits,
                cache_dir,
                base_url,
                revision,
                best_effort,
                raw,
            })
            .await
        }
        Commands::Inspect { path } => commands::inspect::run(path),
        Commands::Purge { path } => commands::purge::run(path),
    }
}
