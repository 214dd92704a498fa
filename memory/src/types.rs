//! Chunk data model.
//!
//! A chunk is the atomic, independently retrievable memory record: a free-form
//! text body plus the structured metadata that drives retrieval and lifecycle.
//! Chunks are values: `related` holds plain `{id, reason}` pairs resolved by
//! lookup, never references, and the listed id need not resolve.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Classification of what a chunk is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Framework,
    Insight,
    Fact,
    Log,
    Emotional,
    Goal,
    Question,
}

/// How settled the knowledge in a chunk is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpistemicStatus {
    Established,
    Working,
    Speculative,
    Deprecated,
}

/// Lifecycle status. `Archived` is terminal in normal operation; archived
/// chunks remain readable and indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    #[default]
    Active,
    Dormant,
    Review,
    Archived,
}

/// A directed relation to another chunk. The target id is not required to
/// resolve to a live chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedChunk {
    pub id: String,
    pub reason: String,
}

/// The atomic memory record.
///
/// Field order here is the header field order on disk. `content` is the file
/// body and is skipped by the header codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 6 lowercase hex characters, unique in the store, immutable.
    pub id: String,
    /// 1-2 sentence scan line; also the source of the filename slug.
    pub summary: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub epistemic: EpistemicStatus,
    #[serde(default)]
    pub status: ChunkStatus,
    /// Short free-form labels answering "surface this chunk when discussing ___".
    #[serde(default)]
    pub surface_tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Advanced on every query-hit write-back.
    pub accessed: DateTime<Utc>,
    #[serde(default)]
    pub retrieved_count: u32,
    #[serde(default)]
    pub relevant_count: u32,
    #[serde(default)]
    pub last_relevant_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RelatedChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_notes: Option<String>,
    /// Free-form body. Lives after the header on disk, not inside it; the
    /// codec serializes the header through [`ChunkMeta`].
    #[serde(default)]
    pub content: String,
}

impl Chunk {
    /// The deterministic embedding input: `summary`, tags, and body joined by
    /// blank lines. The same formula is used on store, update, and external
    /// reload so re-embedding an unchanged chunk yields an identical vector.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}\n\n{}\n\n{}",
            self.summary,
            self.surface_tags.join(", "),
            self.content
        )
    }

    /// Strip the body for query results.
    pub fn to_meta(&self) -> ChunkMeta {
        ChunkMeta {
            id: self.id.clone(),
            summary: self.summary.clone(),
            chunk_type: self.chunk_type,
            epistemic: self.epistemic,
            status: self.status,
            surface_tags: self.surface_tags.clone(),
            created: self.created,
            updated: self.updated,
            accessed: self.accessed,
            retrieved_count: self.retrieved_count,
            relevant_count: self.relevant_count,
            last_relevant_date: self.last_relevant_date,
            related: self.related.clone(),
            expires: self.expires,
            context_notes: self.context_notes.clone(),
        }
    }
}

/// A chunk with its `content` stripped, the shape returned by `query` and
/// the header the codec writes to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub id: String,
    pub summary: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub epistemic: EpistemicStatus,
    #[serde(default)]
    pub status: ChunkStatus,
    #[serde(default)]
    pub surface_tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    #[serde(default)]
    pub retrieved_count: u32,
    #[serde(default)]
    pub relevant_count: u32,
    #[serde(default)]
    pub last_relevant_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RelatedChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_notes: Option<String>,
}

impl ChunkMeta {
    /// Rejoin a header with its body.
    pub fn into_chunk(self, content: String) -> Chunk {
        Chunk {
            id: self.id,
            summary: self.summary,
            chunk_type: self.chunk_type,
            epistemic: self.epistemic,
            status: self.status,
            surface_tags: self.surface_tags,
            created: self.created,
            updated: self.updated,
            accessed: self.accessed,
            retrieved_count: self.retrieved_count,
            relevant_count: self.relevant_count,
            last_relevant_date: self.last_relevant_date,
            related: self.related,
            expires: self.expires,
            context_notes: self.context_notes,
            content,
        }
    }
}

/// Check that an id is exactly 6 lowercase hex characters.
pub fn is_valid_chunk_id(id: &str) -> bool {
    id.len() == 6 && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_joins_summary_tags_and_body() {
        let now = Utc::now();
        let chunk = Chunk {
            id: "a1b2c3".to_string(),
            summary: "greet".to_string(),
            chunk_type: ChunkType::Fact,
            epistemic: EpistemicStatus::Established,
            status: ChunkStatus::Active,
            surface_tags: vec!["hello".to_string(), "world".to_string()],
            created: now,
            updated: now,
            accessed: now,
            retrieved_count: 0,
            relevant_count: 0,
            last_relevant_date: None,
            related: Vec::new(),
            expires: None,
            context_notes: None,
            content: "hello world".to_string(),
        };
        assert_eq!(chunk.embedding_text(), "greet\n\nhello, world\n\nhello world");
    }

    #[test]
    fn chunk_id_validation() {
        assert!(is_valid_chunk_id("a1b2c3"));
        assert!(is_valid_chunk_id("000000"));
        assert!(!is_valid_chunk_id("A1B2C3"));
        assert!(!is_valid_chunk_id("a1b2c"));
        assert!(!is_valid_chunk_id("a1b2c3d"));
        assert!(!is_valid_chunk_id("g1b2c3"));
    }
}
