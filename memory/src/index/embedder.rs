//! Embedding capability.
//!
//! Anything exposing `embed(text) -> unit vector` can back the semantic
//! index. Two implementations ship here:
//!
//! - [`HashEmbedder`]: deterministic feature hashing, no model download, no
//!   network. The default build and the test substitute.
//! - [`FastEmbedder`] (feature `local-embeddings`): fastembed / ONNX runtime
//!   with `bge-small-en-v1.5`, matching the configured 384 dimensions.

use sha2::Digest;
use sha2::Sha256;

use crate::error::Result;

/// An embedding model. Implementations must be deterministic for a given
/// text and return unit-L2-norm vectors of a fixed dimension.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Weight of an exact word feature relative to its character 4-grams.
const WORD_WEIGHT: f32 = 1.0;
const GRAM_WEIGHT: f32 = 0.25;

/// Deterministic hash-based embedder.
///
/// Features are word unigrams plus character 4-grams of words (so inflected
/// forms like "offer"/"offers" land near each other), hashed into signed
/// buckets and L2-normalized. SHA-256 keeps the bucketing stable across
/// processes and platforms.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let idx = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0; 8]));
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((idx % self.dim as u64) as usize, sign)
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let (idx, sign) = self.bucket(feature);
        vector[idx] += sign * weight;
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            self.add_feature(&mut vector, &format!("w:{token}"), WORD_WEIGHT);
            let chars: Vec<char> = token.chars().collect();
            if chars.len() >= 4 {
                for gram in chars.windows(4) {
                    let gram: String = gram.iter().collect();
                    self.add_feature(&mut vector, &format!("g:{gram}"), GRAM_WEIGHT);
                }
            }
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// L2-normalize in place; all-zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(feature = "local-embeddings")]
pub use fast::FastEmbedder;

#[cfg(feature = "local-embeddings")]
mod fast {
    use std::sync::Mutex;

    use fastembed::EmbeddingModel;
    use fastembed::InitOptions;
    use fastembed::TextEmbedding;

    use super::Embedder;
    use super::normalize;
    use crate::error::MemoryErr;
    use crate::error::Result;

    /// fastembed-backed embedder (ONNX Runtime, local inference).
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
        dim: usize,
    }

    impl FastEmbedder {
        /// Load a model by its configured name. Only `bge-small-en-v1.5`
        /// (384 dims) is wired up; it is the store default.
        pub fn new(model_name: &str, dim: usize) -> Result<Self> {
            let model = match model_name {
                "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
                other => {
                    return Err(MemoryErr::EmbedderUnavailable {
                        cause: format!("unknown embedding model: {other}"),
                    });
                }
            };
            let model = TextEmbedding::try_new(
                InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| MemoryErr::EmbedderUnavailable {
                cause: e.to_string(),
            })?;
            Ok(Self {
                model: Mutex::new(model),
                dim,
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn dimension(&self) -> usize {
            self.dim
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let model = self.model.lock().map_err(|_| MemoryErr::EmbedderUnavailable {
                cause: "embedder mutex poisoned".to_string(),
            })?;
            let mut vectors = model
                .embed(vec![text.to_string()], None)
                .map_err(|e| MemoryErr::EmbedderUnavailable {
                    cause: e.to_string(),
                })?;
            let mut vector = vectors.pop().unwrap_or_default();
            vector.resize(self.dim, 0.0);
            normalize(&mut vector);
            Ok(vector)
        }
    }
}
