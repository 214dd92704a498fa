//! Memory store orchestrator.
//!
//! `MemoryStore` is the single mutation gateway over the chunk directory,
//! the semantic index, and the audit log. Every mutating operation (store,
//! update, query write-back, relevance marks, obsoletion, and watcher
//! reconciliation) serializes on one mutex, held across storage, embedder
//! inference, and the audit append. Within an operation the order is always
//! storage (authoritative), then index (derived), then audit (advisory).
//!
//! A process holds at most one store: [`global_store`] lazily opens it on
//! first access and rejects a later call with a different data directory.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::audit::AuditAction;
use crate::audit::AuditLog;
use crate::config::StoreConfig;
use crate::error::MemoryErr;
use crate::error::Result;
use crate::index::Embedder;
use crate::index::SemanticIndex;
use crate::storage;
use crate::storage::ChunkStore;
use crate::types::Chunk;
use crate::types::ChunkMeta;
use crate::types::ChunkStatus;
use crate::types::ChunkType;
use crate::types::EpistemicStatus;
use crate::types::RelatedChunk;
use crate::watcher;
use crate::watcher::ChunkWatcher;

/// Longest content excerpt recorded in UPDATE audit entries.
const UPDATE_EXCERPT_LEN: usize = 100;

/// Metadata for a new chunk. `summary`, `type`, `epistemic`, and
/// `surface_tags` are required; the rest defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkDraft {
    pub summary: Option<String>,
    #[serde(rename = "type")]
    pub chunk_type: Option<ChunkType>,
    pub epistemic: Option<EpistemicStatus>,
    pub surface_tags: Option<Vec<String>>,
    pub status: Option<ChunkStatus>,
    pub related: Option<Vec<RelatedChunk>>,
    pub expires: Option<DateTime<Utc>>,
    pub context_notes: Option<String>,
}

#[derive(Debug)]
struct ValidDraft {
    summary: String,
    chunk_type: ChunkType,
    epistemic: EpistemicStatus,
    surface_tags: Vec<String>,
    status: ChunkStatus,
    related: Vec<RelatedChunk>,
    expires: Option<DateTime<Utc>>,
    context_notes: Option<String>,
}

impl ChunkDraft {
    fn validate(self) -> Result<ValidDraft> {
        fn require<T>(value: Option<T>, field: &'static str) -> Result<T> {
            value.ok_or(MemoryErr::MissingRequiredField { field })
        }
        Ok(ValidDraft {
            summary: require(self.summary, "summary")?,
            chunk_type: require(self.chunk_type, "type")?,
            epistemic: require(self.epistemic, "epistemic")?,
            surface_tags: require(self.surface_tags, "surface_tags")?,
            status: self.status.unwrap_or_default(),
            related: self.related.unwrap_or_default(),
            expires: self.expires,
            context_notes: self.context_notes,
        })
    }
}

/// A partial update to an existing chunk. `None` leaves the field as is.
/// IDs, timestamps, and counters are not patchable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epistemic: Option<EpistemicStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ChunkStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<Vec<RelatedChunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_notes: Option<String>,
}

impl ChunkPatch {
    fn apply(&self, chunk: &mut Chunk) {
        if let Some(summary) = &self.summary {
            chunk.summary = summary.clone();
        }
        if let Some(chunk_type) = self.chunk_type {
            chunk.chunk_type = chunk_type;
        }
        if let Some(epistemic) = self.epistemic {
            chunk.epistemic = epistemic;
        }
        if let Some(status) = self.status {
            chunk.status = status;
        }
        if let Some(tags) = &self.surface_tags {
            chunk.surface_tags = tags.clone();
        }
        if let Some(related) = &self.related {
            chunk.related = related.clone();
        }
        if let Some(expires) = self.expires {
            chunk.expires = Some(expires);
        }
        if let Some(notes) = &self.context_notes {
            chunk.context_notes = Some(notes.clone());
        }
    }
}

/// Store-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub indexed_count: usize,
}

#[derive(Debug)]
struct StoreInner {
    storage: ChunkStore,
    index: SemanticIndex,
    audit: AuditLog,
}

/// The orchestrator. See the module docs for the concurrency model.
#[derive(Debug)]
pub struct MemoryStore {
    config: StoreConfig,
    inner: Arc<Mutex<StoreInner>>,
    watcher: StdMutex<Option<ChunkWatcher>>,
    reconcile_task: StdMutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl MemoryStore {
    /// Open the store: initialize storage and the audit log, rebuild the
    /// semantic index from the chunk directory, and start the watcher.
    /// Chunks that fail to parse are skipped with a warning; the index is
    /// derived state and an operator can fix the file and retouch it.
    pub async fn open(config: StoreConfig) -> Result<Arc<Self>> {
        let mut store = ChunkStore::new(&config.data_dir);
        store.initialize().await?;
        let audit = AuditLog::new(&config.data_dir);
        audit.initialize().await?;

        let embedder = build_embedder(&config)?;
        let mut index = SemanticIndex::new(embedder, config.index.clone());

        let mut loaded = 0usize;
        for id in store.all_ids() {
            match store.read(&id).await {
                Ok(Some(chunk)) => {
                    index.add_document(&id, &chunk.embedding_text())?;
                    loaded += 1;
                }
                Ok(None) => {}
                Err(MemoryErr::InvalidFormat { filename, cause }) => {
                    tracing::warn!(%filename, %cause, "skipping malformed chunk");
                }
                Err(e) => return Err(e),
            }
        }

        let chunks_dir = store.dir().to_path_buf();
        let inner = Arc::new(Mutex::new(StoreInner {
            storage: store,
            index,
            audit,
        }));

        let (chunk_watcher, mut events) = watcher::watch(&chunks_dir, config.watch_settle)?;
        let task_inner = Arc::clone(&inner);
        let reconcile_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut inner = task_inner.lock().await;
                if let Err(e) = reconcile(&mut inner, &event.path).await {
                    tracing::warn!(
                        error = %e,
                        path = %event.path.display(),
                        "watcher reconcile failed"
                    );
                }
            }
        });

        inner
            .lock()
            .await
            .audit
            .log(
                AuditAction::Init,
                None,
                Some(json!({ "chunks": loaded }).to_string()),
            )
            .await;
        tracing::info!(chunks = loaded, data_dir = %config.data_dir.display(), "memory store initialized");

        Ok(Arc::new(Self {
            config,
            inner,
            watcher: StdMutex::new(Some(chunk_watcher)),
            reconcile_task: StdMutex::new(Some(reconcile_task)),
            initialized: AtomicBool::new(true),
        }))
    }

    /// The data directory this store was opened with.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Store a new chunk; returns its id.
    pub async fn store_chunk(&self, content: &str, draft: ChunkDraft) -> Result<String> {
        self.ensure_initialized()?;
        let draft = draft.validate()?;

        let mut inner = self.inner.lock().await;
        let id = inner.storage.generate_unique_id()?;
        let now = Utc::now();
        let chunk = Chunk {
            id: id.clone(),
            summary: draft.summary,
            chunk_type: draft.chunk_type,
            epistemic: draft.epistemic,
            status: draft.status,
            surface_tags: draft.surface_tags,
            created: now,
            updated: now,
            accessed: now,
            retrieved_count: 0,
            relevant_count: 0,
            last_relevant_date: None,
            related: draft.related,
            expires: draft.expires,
            context_notes: draft.context_notes,
            content: content.to_string(),
        };

        inner.storage.write(&chunk).await?;
        inner.index.add_document(&chunk.id, &chunk.embedding_text())?;
        let details = json!({
            "type": chunk.chunk_type,
            "epistemic": chunk.epistemic,
            "tags": chunk.surface_tags,
        });
        inner
            .audit
            .log(AuditAction::Store, Some(&chunk.id), Some(details.to_string()))
            .await;
        Ok(id)
    }

    /// Merge a patch (and optionally new content) into an existing chunk.
    pub async fn update_chunk(
        &self,
        id: &str,
        patch: ChunkPatch,
        content: Option<String>,
    ) -> Result<Chunk> {
        self.ensure_initialized()?;
        let mut inner = self.inner.lock().await;
        let mut chunk = inner
            .storage
            .read(id)
            .await?
            .ok_or_else(|| MemoryErr::ChunkNotFound { id: id.to_string() })?;

        let mut details = match serde_json::to_value(&patch) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        patch.apply(&mut chunk);
        chunk.updated = Utc::now();
        if let Some(content) = content {
            details.insert("content".to_string(), json!(excerpt(&content)));
            chunk.content = content;
        }

        inner.storage.write(&chunk).await?;
        inner.index.update_document(id, &chunk.embedding_text())?;
        inner
            .audit
            .log(
                AuditAction::Update,
                Some(id),
                Some(serde_json::Value::Object(details).to_string()),
            )
            .await;
        Ok(chunk)
    }

    /// Read chunks by id, input order, unknown ids dropped.
    pub async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        self.ensure_initialized()?;
        let inner = self.inner.lock().await;
        inner.storage.read_many(ids).await
    }

    /// Semantic query. Every hit gets its `retrieved_count` incremented and
    /// `accessed` stamped before the metadata (content stripped) is
    /// returned, best match first.
    pub async fn query(&self, search_text: &str, limit: usize) -> Result<Vec<ChunkMeta>> {
        self.ensure_initialized()?;
        let mut inner = self.inner.lock().await;
        let hits = inner.index.query(search_text, limit)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        let mut chunks = inner.storage.read_many(&ids).await?;
        let now = Utc::now();
        for chunk in &mut chunks {
            chunk.retrieved_count += 1;
            chunk.accessed = now;
            inner.storage.write(chunk).await?;
        }
        inner
            .audit
            .log(
                AuditAction::Query,
                None,
                Some(json!({ "query": search_text, "ids": ids }).to_string()),
            )
            .await;
        inner
            .audit
            .log(
                AuditAction::Retrieve,
                None,
                Some(json!({ "ids": ids }).to_string()),
            )
            .await;
        Ok(chunks.iter().map(Chunk::to_meta).collect())
    }

    /// Record that the given chunks proved relevant. Unknown ids are
    /// silently skipped.
    pub async fn mark_relevant(&self, ids: &[String]) -> Result<()> {
        self.ensure_initialized()?;
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for id in ids {
            let Some(mut chunk) = inner.storage.read(id).await? else {
                continue;
            };
            chunk.relevant_count += 1;
            chunk.last_relevant_date = Some(now);
            inner.storage.write(&chunk).await?;
        }
        inner
            .audit
            .log(
                AuditAction::Relevant,
                None,
                Some(json!({ "ids": ids }).to_string()),
            )
            .await;
        Ok(())
    }

    /// Archive a chunk, recording why in its context notes.
    pub async fn mark_obsolete(&self, id: &str, reason: &str) -> Result<Chunk> {
        self.ensure_initialized()?;
        let mut inner = self.inner.lock().await;
        let mut chunk = inner
            .storage
            .read(id)
            .await?
            .ok_or_else(|| MemoryErr::ChunkNotFound { id: id.to_string() })?;

        chunk.status = ChunkStatus::Archived;
        chunk.updated = Utc::now();
        let marker = format!("[Obsoleted: {reason}]");
        chunk.context_notes = Some(match chunk.context_notes.take() {
            Some(notes) if !notes.is_empty() => format!("{notes}\n{marker}"),
            _ => marker,
        });

        inner.storage.write(&chunk).await?;
        inner
            .audit
            .log(AuditAction::Obsolete, Some(id), Some(reason.to_string()))
            .await;
        Ok(chunk)
    }

    /// Raw audit log text, optionally filtered to entries at or after
    /// `since`.
    pub async fn audit_log(&self, since: Option<DateTime<Utc>>) -> Result<String> {
        self.ensure_initialized()?;
        let inner = self.inner.lock().await;
        inner.audit.read_since(since).await
    }

    /// Chunk and index counts.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        StoreStats {
            chunk_count: inner.storage.chunk_count(),
            indexed_count: inner.index.document_count(),
        }
    }

    /// Stop the watcher and mark the store uninitialized. Further
    /// operations fail with `NotInitialized`.
    pub async fn shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        if let Ok(mut watcher) = self.watcher.lock() {
            watcher.take();
        }
        if let Ok(mut task) = self.reconcile_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        tracing::info!("memory store shut down");
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryErr::NotInitialized)
        }
    }
}

/// Fold one watcher event back into the index. The file's current state on
/// disk decides the direction: readable chunk -> re-embed, gone -> unindex.
/// Re-running the same event is a no-op either way.
async fn reconcile(inner: &mut StoreInner, path: &Path) -> Result<()> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };
    let Some(id) = storage::id_from_filename(name) else {
        return Ok(());
    };
    inner.storage.reload_index().await?;
    match inner.storage.read(&id).await? {
        Some(chunk) => {
            inner.index.update_document(&id, &chunk.embedding_text())?;
            inner.audit.log(AuditAction::Reload, Some(&id), None).await;
        }
        None => {
            inner.index.remove_document(&id);
        }
    }
    Ok(())
}

fn build_embedder(config: &StoreConfig) -> Result<Arc<dyn Embedder>> {
    #[cfg(feature = "local-embeddings")]
    {
        let embedder =
            crate::index::FastEmbedder::new(&config.index.model, config.index.dimension)?;
        Ok(Arc::new(embedder))
    }
    #[cfg(not(feature = "local-embeddings"))]
    {
        Ok(Arc::new(crate::index::HashEmbedder::new(
            config.index.dimension,
        )))
    }
}

fn excerpt(content: &str) -> String {
    let mut out: String = content.chars().take(UPDATE_EXCERPT_LEN).collect();
    if content.chars().count() > UPDATE_EXCERPT_LEN {
        out.push_str("...");
    }
    out
}

// ============================================================================
// Process-wide store
// ============================================================================

static GLOBAL_STORE: OnceCell<Arc<MemoryStore>> = OnceCell::const_new();

/// The process-wide store, opened on first access. A later call with a
/// different data directory is rejected; re-initialization is not
/// supported within one process.
pub async fn global_store(data_dir: &Path) -> Result<Arc<MemoryStore>> {
    let requested = StoreConfig::from_env_or(data_dir).data_dir;
    let store = GLOBAL_STORE
        .get_or_try_init(|| async {
            MemoryStore::open(StoreConfig::from_env_or(data_dir)).await
        })
        .await?;
    if store.config.data_dir != requested {
        return Err(MemoryErr::DataDirMismatch {
            active: store.config.data_dir.clone(),
            requested,
        });
    }
    Ok(Arc::clone(store))
}
