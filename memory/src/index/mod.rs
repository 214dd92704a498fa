//! Semantic index: embedder + ANN backend behind a stable string-ID facade.
//!
//! The backend addresses points by integer slots below `max_elements`; chunk
//! IDs stay stable for the life of the store. The facade maps between the
//! two and recycles slots freed by deletion (smallest first), so churn never
//! forces a re-index and never leaks capacity.

pub mod embedder;
pub mod hnsw;

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::error::MemoryErr;
use crate::error::Result;

pub use embedder::Embedder;
pub use embedder::HashEmbedder;
#[cfg(feature = "local-embeddings")]
pub use embedder::FastEmbedder;
use hnsw::HnswBackend;

/// One semantic search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    /// Cosine distance; lower is closer.
    pub distance: f32,
}

/// ANN index keyed by chunk id.
pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    backend: HnswBackend,
    config: IndexConfig,
    id_to_slot: HashMap<String, usize>,
    slot_to_id: HashMap<usize, String>,
    free_slots: BTreeSet<usize>,
    next_slot: usize,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("id_to_slot", &self.id_to_slot)
            .field("slot_to_id", &self.slot_to_id)
            .field("free_slots", &self.free_slots)
            .field("next_slot", &self.next_slot)
            .finish()
    }
}

impl SemanticIndex {
    /// Build an empty index over the given embedder.
    pub fn new(embedder: Arc<dyn Embedder>, config: IndexConfig) -> Self {
        let backend = HnswBackend::new(config.max_elements, config.m, config.ef_construction);
        Self {
            embedder,
            backend,
            config,
            id_to_slot: HashMap::new(),
            slot_to_id: HashMap::new(),
            free_slots: BTreeSet::new(),
            next_slot: 0,
        }
    }

    /// Drop every document and allocate a fresh backend.
    pub fn reset(&mut self) {
        self.backend =
            HnswBackend::new(self.config.max_elements, self.config.m, self.config.ef_construction);
        self.id_to_slot.clear();
        self.slot_to_id.clear();
        self.free_slots.clear();
        self.next_slot = 0;
        tracing::debug!("semantic index reset");
    }

    /// Add a document, replacing any existing entry for the same id. The
    /// slot is the smallest free one, else the next never-used slot;
    /// `CapacityExceeded` when the backend is full.
    pub fn add_document(&mut self, id: &str, text: &str) -> Result<()> {
        let vector = self.embedder.embed(text)?;
        if self.id_to_slot.contains_key(id) {
            self.remove_document(id);
        }
        let slot = match self.free_slots.pop_first() {
            Some(slot) => slot,
            None => {
                if self.next_slot >= self.config.max_elements {
                    return Err(MemoryErr::CapacityExceeded {
                        max_elements: self.config.max_elements,
                    });
                }
                let slot = self.next_slot;
                self.next_slot += 1;
                slot
            }
        };
        self.backend.add_point(vector, slot)?;
        self.id_to_slot.insert(id.to_string(), slot);
        self.slot_to_id.insert(slot, id.to_string());
        Ok(())
    }

    /// Remove a document, freeing its slot for reuse. False if unknown.
    pub fn remove_document(&mut self, id: &str) -> bool {
        let Some(slot) = self.id_to_slot.remove(id) else {
            return false;
        };
        self.backend.mark_delete(slot);
        self.slot_to_id.remove(&slot);
        self.free_slots.insert(slot);
        true
    }

    /// Re-embed a document under the same id.
    pub fn update_document(&mut self, id: &str, text: &str) -> Result<()> {
        self.remove_document(id);
        self.add_document(id, text)
    }

    /// K nearest documents, ascending by distance. K is capped at the
    /// current document count; hits whose slot no longer maps to an id are
    /// dropped (the backend may still surface tombstoned points).
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let k = k.min(self.document_count());
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(text)?;
        let hits = self.backend.search_knn(&vector, k, self.config.ef);
        Ok(hits
            .into_iter()
            .filter_map(|(slot, distance)| {
                self.slot_to_id.get(&slot).map(|id| SearchHit {
                    id: id.clone(),
                    distance,
                })
            })
            .collect())
    }

    pub fn has_document(&self, id: &str) -> bool {
        self.id_to_slot.contains_key(id)
    }

    pub fn document_count(&self) -> usize {
        self.id_to_slot.len()
    }

    /// All indexed ids, in no particular order.
    pub fn all_ids(&self) -> Vec<String> {
        self.id_to_slot.keys().cloned().collect()
    }
}
