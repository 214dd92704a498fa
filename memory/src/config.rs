//! Store configuration.
//!
//! The data directory is the only required setting; the semantic-index knobs
//! default to the shipped model and HNSW parameters. Fields default
//! per-field so the RPC layer can deserialize partial JSON.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Environment override for the data directory.
pub const DATA_DIR_ENV: &str = "ENGRAM_DATA_DIR";

/// Default write-settle window for the chunk directory watcher.
pub const DEFAULT_WATCH_SETTLE: Duration = Duration::from_millis(500);

/// Semantic index options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Embedding model name (used by the `local-embeddings` build).
    pub model: String,
    /// ANN backend capacity.
    pub max_elements: usize,
    /// HNSW connectivity.
    pub m: usize,
    pub ef_construction: usize,
    /// Search beam width.
    pub ef: usize,
    /// Embedding dimension.
    pub dimension: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            model: "bge-small-en-v1.5".to_string(),
            max_elements: 10_000,
            m: 16,
            ef_construction: 100,
            ef: 50,
            dimension: 384,
        }
    }
}

/// Top-level store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub index: IndexConfig,
    /// How long the watcher waits for a path to stop changing before it
    /// reports the event. Tests shorten this.
    pub watch_settle: Duration,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            index: IndexConfig::default(),
            watch_settle: DEFAULT_WATCH_SETTLE,
        }
    }

    /// Like [`new`], but an `ENGRAM_DATA_DIR` environment variable takes
    /// precedence over the given directory.
    ///
    /// [`new`]: StoreConfig::new
    pub fn from_env_or(data_dir: &Path) -> Self {
        match std::env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::new(data_dir),
        }
    }
}
