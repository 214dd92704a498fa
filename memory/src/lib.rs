//! Engram, a single-user semantic memory store.
//!
//! Small, self-contained "chunks" of knowledge live as human-editable
//! markdown files with a YAML header; an in-memory HNSW index over their
//! embeddings answers similarity queries; an append-only audit log records
//! every operation; a filesystem watcher folds external edits back into the
//! index.
//!
//! ## Architecture
//!
//! ```text
//! MemoryStore (orchestrator, single mutation gateway)
//!   ├── ChunkStore      <dataDir>/chunks/*.md       (authoritative)
//!   ├── SemanticIndex   embedder + HNSW over ids    (derived, rebuildable)
//!   ├── AuditLog        <dataDir>/audit.log         (advisory)
//!   └── watcher         settled add/change/unlink   (reconciliation)
//! ```
//!
//! The chunk directory is the source of truth: the index carries no
//! persistence of its own and is rebuilt from the files on startup or on
//! demand. External edits (the user opening a chunk in their editor)
//! surface through the watcher and are re-embedded in place.

pub mod audit;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod storage;
pub mod store;
pub mod types;
pub mod watcher;

pub use config::IndexConfig;
pub use config::StoreConfig;
pub use error::MemoryErr;
pub use error::Result;
pub use store::ChunkDraft;
pub use store::ChunkPatch;
pub use store::MemoryStore;
pub use store::StoreStats;
pub use store::global_store;
pub use types::Chunk;
pub use types::ChunkMeta;
pub use types::ChunkStatus;
pub use types::ChunkType;
pub use types::EpistemicStatus;
pub use types::RelatedChunk;
