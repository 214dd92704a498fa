//! Engram CLI - testing tool for the memory store.
//!
//! Exercises every store operation against a data directory:
//!
//! ```bash
//! engram --data-dir ./memory store --summary "greet" --chunk-type fact \
//!     --epistemic established --tag hello "hello world"
//! engram --data-dir ./memory query "startup job offer evaluation"
//! engram --data-dir ./memory stats
//! ```
//!
//! Use `-v` flags to control log verbosity, or set `RUST_LOG`.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::anyhow;
use clap::Parser;
use clap::Subcommand;

use engram_memory::ChunkDraft;
use engram_memory::ChunkPatch;
use engram_memory::MemoryStore;
use engram_memory::StoreConfig;
use engram_memory::config::DATA_DIR_ENV;

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Semantic memory store - store, query, and audit chunks")]
#[command(version)]
struct Cli {
    /// Data directory (falls back to ENGRAM_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a new chunk
    Store {
        /// Chunk body
        content: String,
        #[arg(long)]
        summary: String,
        /// framework|insight|fact|log|emotional|goal|question
        #[arg(long = "chunk-type")]
        chunk_type: String,
        /// established|working|speculative|deprecated
        #[arg(long)]
        epistemic: String,
        /// Surface tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Read chunks by id
    Get {
        ids: Vec<String>,
    },

    /// Semantic search
    Query {
        text: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Mark chunks as having proven relevant
    Relevant {
        ids: Vec<String>,
    },

    /// Archive a chunk with a reason
    Obsolete {
        id: String,
        reason: String,
    },

    /// Update chunk metadata and/or content
    Update {
        id: String,
        /// JSON patch object, e.g. '{"summary": "new"}'
        #[arg(long)]
        patch: Option<String>,
        /// Replacement body
        #[arg(long)]
        content: Option<String>,
    },

    /// Show chunk and index counts
    Stats,

    /// Print the audit log
    Audit {
        /// RFC 3339 cutoff, e.g. 2026-08-01T00:00:00Z
        #[arg(long)]
        since: Option<String>,
    },
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("engram_memory={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var(DATA_DIR_ENV).ok().map(PathBuf::from))
        .ok_or_else(|| anyhow!("pass --data-dir or set {DATA_DIR_ENV}"))?;

    let store = MemoryStore::open(StoreConfig::new(data_dir))
        .await
        .context("failed to open memory store")?;

    match cli.command {
        Command::Store {
            content,
            summary,
            chunk_type,
            epistemic,
            tags,
        } => {
            let draft = ChunkDraft {
                summary: Some(summary),
                chunk_type: Some(parse_json_token(&chunk_type)?),
                epistemic: Some(parse_json_token(&epistemic)?),
                surface_tags: Some(tags),
                ..ChunkDraft::default()
            };
            let id = store.store_chunk(&content, draft).await?;
            println!("{id}");
        }
        Command::Get { ids } => {
            let chunks = store.get_chunks(&ids).await?;
            for chunk in chunks {
                println!("{}", serde_json::to_string_pretty(&chunk)?);
            }
        }
        Command::Query { text, limit } => {
            let hits = store.query(&text, limit).await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Command::Relevant { ids } => {
            store.mark_relevant(&ids).await?;
        }
        Command::Obsolete { id, reason } => {
            let chunk = store.mark_obsolete(&id, &reason).await?;
            println!("{}", serde_json::to_string_pretty(&chunk)?);
        }
        Command::Update { id, patch, content } => {
            let patch: ChunkPatch = match patch {
                Some(text) => serde_json::from_str(&text).context("invalid patch JSON")?,
                None => ChunkPatch::default(),
            };
            let chunk = store.update_chunk(&id, patch, content).await?;
            println!("{}", serde_json::to_string_pretty(&chunk)?);
        }
        Command::Stats => {
            let stats = store.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Audit { since } => {
            let since = since
                .map(|s| {
                    chrono::DateTime::parse_from_rfc3339(&s)
                        .map(|t| t.with_timezone(&chrono::Utc))
                        .context("invalid --since timestamp")
                })
                .transpose()?;
            print!("{}", store.audit_log(since).await?);
        }
    }

    store.shutdown().await;
    Ok(())
}

/// Parse a lowercase token (e.g. `fact`) into a serde-backed enum.
fn parse_json_token<T: serde::de::DeserializeOwned>(token: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(token.to_string()))
        .map_err(|e| anyhow!("invalid value {token:?}: {e}"))
}
