//! Error taxonomy for the memory store.
//!
//! Storage and embedding errors abort the current operation; audit-log
//! appends and watcher handler errors are logged and swallowed by their
//! callers instead of being surfaced here.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, MemoryErr>;

/// Errors surfaced by the memory store and its components.
#[derive(Debug, Error)]
pub enum MemoryErr {
    /// A required metadata field was absent when storing a chunk.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: &'static str },

    /// The requested chunk does not exist in storage.
    #[error("chunk not found: {id}")]
    ChunkNotFound { id: String },

    /// A chunk file could not be parsed.
    #[error("invalid chunk format in {filename}: {cause}")]
    InvalidFormat { filename: String, cause: String },

    /// The semantic index has no slots left.
    #[error("semantic index capacity exceeded ({max_elements} elements)")]
    CapacityExceeded { max_elements: usize },

    /// ID generation kept colliding with existing chunks.
    #[error("failed to generate a unique chunk id after {attempts} attempts")]
    IdExhausted { attempts: u32 },

    /// Filesystem failure.
    #[error("io error at {}: {cause}", .path.display())]
    Io { path: PathBuf, cause: String },

    /// The embedding model could not be loaded or is not available.
    #[error("embedder unavailable: {cause}")]
    EmbedderUnavailable { cause: String },

    /// Watcher setup failed.
    #[error("watcher error: {cause}")]
    Watch { cause: String },

    /// The global store was already opened with a different data directory.
    #[error(
        "store already initialized at {}, refusing re-init at {}",
        .active.display(),
        .requested.display()
    )]
    DataDirMismatch { active: PathBuf, requested: PathBuf },

    /// Operation invoked on a store that was shut down or never opened.
    #[error("memory store is not initialized")]
    NotInitialized,
}

impl MemoryErr {
    /// Wrap an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        MemoryErr::Io {
            path: path.into(),
            cause: err.to_string(),
        }
    }
}
