//! Retrieval configuration, loaded from an optional TOML file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Per-call timeout for the embedding provider.
    pub embedding_timeout_ms: u64,
    /// Per-call timeout for vector index and ledger operations.
    pub index_timeout_ms: u64,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    /// Initial backoff, doubled after every retry.
    pub retry_backoff_ms: u64,
    /// Over-fetch factor applied to the requested limit before re-ranking.
    pub candidate_multiplier: usize,
    /// Upper bound on candidates fetched from the vector index.
    pub max_candidates: usize,
    pub stage1_limit: usize,
    pub stage2_max_tables: usize,
    pub pattern_similarity_threshold: f64,
    pub pattern_min_success_rate: f64,
    pub pattern_candidates: usize,
    pub embedding_dimension: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_timeout_ms: 5_000,
            index_timeout_ms: 2_000,
            max_retries: 2,
            retry_backoff_ms: 100,
            candidate_multiplier: 2,
            max_candidates: 50,
            stage1_limit: 10,
            stage2_max_tables: 5,
            pattern_similarity_threshold: 0.85,
            pattern_min_success_rate: 0.8,
            pattern_candidates: 5,
            embedding_dimension: tablescout_embeddings::EMBEDDING_DIM,
        }
    }
}

impl RetrievalConfig {
    /// Read and validate a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| Error::Config {
            field: path.display().to_string(),
            message: format!("failed to read: {err}"),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|err| Error::Config {
            field: path.display().to_string(),
            message: format!("failed to parse: {err}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("embedding_timeout_ms", self.embedding_timeout_ms as usize),
            ("index_timeout_ms", self.index_timeout_ms as usize),
            ("candidate_multiplier", self.candidate_multiplier),
            ("max_candidates", self.max_candidates),
            ("stage1_limit", self.stage1_limit),
            ("stage2_max_tables", self.stage2_max_tables),
            ("pattern_candidates", self.pattern_candidates),
            ("embedding_dimension", self.embedding_dimension),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::Config {
                    field: field.to_string(),
                    message: "must be positive, got 0".to_string(),
                });
            }
        }

        let unit = [
            (
                "pattern_similarity_threshold",
                self.pattern_similarity_threshold,
            ),
            ("pattern_min_success_rate", self.pattern_min_success_rate),
        ];
        for (field, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config {
                    field: field.to_string(),
                    message: format!("must be within [0, 1], got {value}"),
                });
            }
        }

        Ok(())
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    /// How many candidates to request from the vector index for `limit` results.
    pub fn candidate_count(&self, limit: usize) -> usize {
        limit
            .saturating_mul(self.candidate_multiplier)
            .min(self.max_candidates)
    }
}
