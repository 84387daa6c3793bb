use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use extract::EntityExtractor;
use index::GraphBuilder;

use crate::scorer::{DEFAULT_RELATIONSHIP_WEIGHT, ScoringWeights};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub selection: SelectionConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
}

/// What to do when one chunk cannot be scored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaultTolerance {
    /// Exclude the chunk, log a warning, keep going
    SkipAndLog,
    /// Abort the whole selection
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub weights: ScoringWeights,
    pub relationship_weight: f64,
    pub max_chunks: usize,
    /// Chunks whose total falls below this are not returned
    pub min_total_score: Option<f64>,
    pub fault_tolerance: FaultTolerance,
    /// Fail the selection when query entity extraction fails instead of
    /// scoring with no query entities
    pub propagate_extraction_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_embeddings: usize,
    pub max_concurrent_extractions: usize,
    pub per_chunk_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub ollama_url: String,
    pub embedding_model: String,
    pub extraction_model: String,
    pub request_timeout_secs: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            relationship_weight: DEFAULT_RELATIONSHIP_WEIGHT,
            max_chunks: 5,
            min_total_score: None,
            fault_tolerance: FaultTolerance::SkipAndLog,
            propagate_extraction_errors: false,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embeddings: 5,
            max_concurrent_extractions: 5,
            per_chunk_timeout_ms: 10_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            extraction_model: "llama3".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn per_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.per_chunk_timeout_ms)
    }
}

impl AppConfig {
    /// Wide fan-out, short timeouts, few retries
    pub fn fast_mode() -> Self {
        Self {
            concurrency: ConcurrencyConfig {
                max_concurrent_embeddings: 10,
                max_concurrent_extractions: 20,
                per_chunk_timeout_ms: 3_000,
            },
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 200,
                max_backoff_ms: 1000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 50000,
            },
            ..Self::default()
        }
    }

    /// Fail on any chunk error and always embed fresh
    pub fn accurate_mode() -> Self {
        Self {
            selection: SelectionConfig {
                fault_tolerance: FaultTolerance::FailFast,
                propagate_extraction_errors: true,
                ..SelectionConfig::default()
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_embeddings: 3,
                max_concurrent_extractions: 3,
                per_chunk_timeout_ms: 30_000,
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 1000,
                max_backoff_ms: 20000,
            },
            cache: CacheConfig {
                enabled: false,
                max_entries: 0,
            },
            ..Self::default()
        }
    }

    /// Graph builder bounded by `max_concurrent_extractions`
    pub fn graph_builder(&self, extractor: Arc<dyn EntityExtractor>) -> GraphBuilder {
        GraphBuilder::new(extractor)
            .with_max_concurrent(self.concurrency.max_concurrent_extractions)
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Apply `GRAPHRAG_*` environment overrides
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("GRAPHRAG_OLLAMA_URL") {
            self.provider.ollama_url = url;
        }
        if let Ok(model) = std::env::var("GRAPHRAG_EMBEDDING_MODEL") {
            self.provider.embedding_model = model;
        }
        if let Ok(max) = std::env::var("GRAPHRAG_MAX_CHUNKS") {
            self.selection.max_chunks = max
                .parse()
                .context("GRAPHRAG_MAX_CHUNKS must be a positive integer")?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "selection": {"max_chunks": 3, "fault_tolerance": "fail_fast"},
            "concurrency": {"per_chunk_timeout_ms": 250}
        }"#;

        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.selection.max_chunks, 3);
        assert_eq!(config.selection.fault_tolerance, FaultTolerance::FailFast);
        assert_eq!(config.selection.weights, ScoringWeights::default());
        assert_eq!(config.concurrency.per_chunk_timeout(), Duration::from_millis(250));
        assert_eq!(config.concurrency.max_concurrent_embeddings, 5);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_presets() {
        let accurate = AppConfig::accurate_mode();
        assert_eq!(accurate.selection.fault_tolerance, FaultTolerance::FailFast);
        assert!(!accurate.cache.enabled);

        let fast = AppConfig::fast_mode();
        assert_eq!(fast.selection.fault_tolerance, FaultTolerance::SkipAndLog);
        assert!(
            fast.concurrency.max_concurrent_embeddings
                > accurate.concurrency.max_concurrent_embeddings
        );
    }

    #[test]
    fn test_graph_builder_uses_extraction_limit() {
        let extractor = Arc::new(extract::StaticExtractor::default());

        let builder = AppConfig::accurate_mode().graph_builder(extractor.clone());
        assert_eq!(builder.max_concurrent(), 3);

        let mut config = AppConfig::default();
        config.concurrency.max_concurrent_extractions = 0;
        assert_eq!(config.graph_builder(extractor).max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let json = r#"{"selection": {"weights": {
            "semantic": 0.5, "entity": 0.5, "relationship": 0.0, "position": 0.0
        }}}"#;
        tokio::fs::write(&path, json).await.unwrap();

        let config = AppConfig::load(&path).await.unwrap();

        assert_eq!(config.selection.weights.semantic, 0.5);
        assert_eq!(config.selection.max_chunks, 5);
        assert!(AppConfig::load(&dir.path().join("missing.json")).await.is_err());
    }
}
