//! Chunk directory storage.
//!
//! Owns `<dataDir>/chunks/` and an in-memory id -> filename map rebuilt by
//! scanning the directory. Files are named `{id}-{slug}.md` where the slug is
//! derived from the chunk summary; renaming on summary change keeps filenames
//! scannable by humans. The directory is the authoritative state: everything
//! else in the store is derived from it.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use rand::RngCore;

use crate::codec;
use crate::error::MemoryErr;
use crate::error::Result;
use crate::types::Chunk;
use crate::types::is_valid_chunk_id;

/// Extension of chunk files, including the dot.
pub const CHUNK_FILE_EXT: &str = ".md";

/// Maximum slug length in characters.
const SLUG_MAX_LEN: usize = 15;

/// Attempts before `generate_unique_id` gives up.
const ID_MAX_ATTEMPTS: u32 = 100;

/// Filesystem-backed chunk repository.
#[derive(Debug)]
pub struct ChunkStore {
    dir: PathBuf,
    /// id -> filename (basename only), for every live chunk file.
    filenames: HashMap<String, String>,
}

impl ChunkStore {
    /// Create a store rooted at `<data_dir>/chunks`. Call [`initialize`]
    /// before use.
    ///
    /// [`initialize`]: ChunkStore::initialize
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("chunks"),
            filenames: HashMap::new(),
        }
    }

    /// The chunk directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the chunk directory if missing and build the id index.
    /// Idempotent.
    pub async fn initialize(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryErr::io(&self.dir, e))?;
        self.reload_index().await
    }

    /// Rescan the directory and rebuild the id -> filename map.
    pub async fn reload_index(&mut self) -> Result<()> {
        let mut filenames = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| MemoryErr::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryErr::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = id_from_filename(name) {
                filenames.insert(id, name.to_string());
            }
        }
        self.filenames = filenames;
        Ok(())
    }

    /// Whether a chunk with this id exists.
    pub fn exists(&self, id: &str) -> bool {
        self.filenames.contains_key(id)
    }

    /// IDs of all live chunks, in no particular order.
    pub fn all_ids(&self) -> Vec<String> {
        self.filenames.keys().cloned().collect()
    }

    /// Number of live chunks.
    pub fn chunk_count(&self) -> usize {
        self.filenames.len()
    }

    /// Draw random 6-hex ids until one is free. Fails with `IdExhausted`
    /// after 100 collisions.
    pub fn generate_unique_id(&self) -> Result<String> {
        let mut rng = rand::rng();
        for _ in 0..ID_MAX_ATTEMPTS {
            let mut bytes = [0u8; 3];
            rng.fill_bytes(&mut bytes);
            let id = hex::encode(bytes);
            if !self.exists(&id) {
                return Ok(id);
            }
        }
        Err(MemoryErr::IdExhausted {
            attempts: ID_MAX_ATTEMPTS,
        })
    }

    /// Read a chunk by id. `None` if the id is unknown; parse failures
    /// propagate as `InvalidFormat`.
    pub async fn read(&self, id: &str) -> Result<Option<Chunk>> {
        let Some(filename) = self.filenames.get(id) else {
            return Ok(None);
        };
        let path = self.dir.join(filename);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MemoryErr::io(&path, e))?;
        codec::parse(&text, filename).map(Some)
    }

    /// Read several chunks, preserving input order and silently dropping
    /// unknown ids.
    pub async fn read_many(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = self.read(id).await? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Write a chunk, renaming its file if the summary slug changed.
    /// Whole-file overwrite; last writer wins.
    pub async fn write(&mut self, chunk: &Chunk) -> Result<()> {
        let filename = filename_for(&chunk.id, &chunk.summary);
        if let Some(old) = self.filenames.get(&chunk.id) {
            if old != &filename {
                let old_path = self.dir.join(old);
                match tokio::fs::remove_file(&old_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(MemoryErr::io(&old_path, e)),
                }
            }
        }
        let path = self.dir.join(&filename);
        let text = codec::serialize(chunk)?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| MemoryErr::io(&path, e))?;
        self.filenames.insert(chunk.id.clone(), filename);
        Ok(())
    }

    /// Delete a chunk file. Returns false if the id is unknown.
    pub async fn delete(&mut self, id: &str) -> Result<bool> {
        let Some(filename) = self.filenames.remove(id) else {
            return Ok(false);
        };
        let path = self.dir.join(&filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(MemoryErr::io(&path, e)),
        }
    }
}

/// Filename for a chunk: `{id}-{slug}.md`.
pub fn filename_for(id: &str, summary: &str) -> String {
    format!("{id}-{}{CHUNK_FILE_EXT}", slugify(summary))
}

/// Extract the chunk id from a filename: the characters before the first
/// `-` of a `.md` file, accepted only when they form a 6-hex id.
pub fn id_from_filename(name: &str) -> Option<String> {
    let stem = name.strip_suffix(CHUNK_FILE_EXT)?;
    let prefix = stem.split('-').next().unwrap_or(stem);
    is_valid_chunk_id(prefix).then(|| prefix.to_string())
}

/// Derive a filename slug from a summary: lowercase, runs of
/// non-alphanumeric collapsed to `-`, trimmed, at most 15 characters,
/// re-trimmed after truncation.
pub fn slugify(summary: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in summary.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    let truncated: String = slug.chars().take(SLUG_MAX_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}
