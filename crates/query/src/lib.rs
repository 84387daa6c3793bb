pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod scorer;
pub mod selector;

pub use cache::{CacheStats, EmbeddingCache};
pub use config::{AppConfig, FaultTolerance, SelectionConfig};
pub use context::build_context;
pub use error::{ScoringError, SelectionError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use retry::RetryPolicy;
pub use scorer::{ChunkScores, QueryContext, RelevanceScorer, ScoringWeights};
pub use selector::{
    ChunkSelector, ExcludedChunk, ExclusionReason, RankedChunk, Selection, SelectionRequest,
    select_relevant_chunks,
};
