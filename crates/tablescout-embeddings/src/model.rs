use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::EMBEDDING_DIM;

/// Errors raised by an embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    /// Character n-gram size used for sub-word features.
    pub ngram: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
            ngram: 3,
        }
    }
}

/// Trait for embedding models.
///
/// Implementations must return L2-normalized vectors of `dimension()` length so
/// that L2 distances stay within `[0, 2]`.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn dimension(&self) -> usize;
}

/// Deterministic feature-hashing embedder.
///
/// Whole tokens and character n-grams are hashed (FNV-1a) into signed buckets.
/// The output is stable across processes and Rust versions, so vectors written
/// to disk stay comparable with vectors computed later.
pub struct HashingEmbeddingModel {
    dimension: usize,
    ngram: usize,
}

impl HashingEmbeddingModel {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            dimension: config.dimension.max(1),
            ngram: config.ngram.max(1),
        }
    }

    fn features(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut features = Vec::new();

        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            features.push(format!("w:{token}"));

            let chars: Vec<char> = token.chars().collect();
            if chars.len() > self.ngram {
                for window in chars.windows(self.ngram) {
                    features.push(format!("g:{}", window.iter().collect::<String>()));
                }
            }
        }

        features
    }
}

impl Default for HashingEmbeddingModel {
    fn default() -> Self {
        Self::new(&EmbeddingConfig::default())
    }
}

impl EmbeddingModel for HashingEmbeddingModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let features = self.features(text);
        if features.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimension];
        for feature in &features {
            let hash = fnv1a(feature.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            // Word features weigh more than sub-word fragments
            let weight = if feature.starts_with("w:") { 1.0 } else { 0.5 };
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            // All features cancelled out; fall back to the first feature's bucket
            let bucket = (fnv1a(features[0].as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] = 1.0;
            return Ok(vector);
        }
        for v in &mut vector {
            *v /= norm;
        }

        debug!(features = features.len(), "Embedded text");
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Create the in-process embedding model.
pub fn create_embedding_model(config: Option<EmbeddingConfig>) -> Arc<dyn EmbeddingModel> {
    let config = config.unwrap_or_default();
    Arc::new(HashingEmbeddingModel::new(&config))
}
