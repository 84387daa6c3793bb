use std::time::Duration;
use thiserror::Error;

use extract::ExtractionError;
use index::{ChunkId, ProviderError};

/// Why one chunk could not be scored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Embedding dimension mismatch: query has {query}, chunk has {chunk}")]
    DimensionMismatch { query: usize, chunk: usize },

    #[error("Chunk embedding failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Chunk scoring timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Graph has no chunks to select from")]
    EmptyGraph,

    #[error("max_chunks must be at least 1, got {0}")]
    InvalidMaxChunks(usize),

    #[error("Scoring weight '{field}' must be finite and non-negative, got {value}")]
    InvalidWeights { field: &'static str, value: f64 },

    #[error("Failed to embed query: {0}")]
    QueryEmbedding(#[source] ProviderError),

    #[error("Failed to extract query entities: {0}")]
    Extraction(#[source] ExtractionError),

    #[error("Embedding dimension mismatch on chunk {chunk_id}: query has {query}, chunk has {chunk}")]
    DimensionMismatch {
        chunk_id: ChunkId,
        query: usize,
        chunk: usize,
    },

    #[error("Scoring failed for chunk {chunk_id}: {source}")]
    ChunkFailed {
        chunk_id: ChunkId,
        #[source]
        source: ScoringError,
    },

    #[error("All {count} chunks failed to score")]
    AllChunksFailed { count: usize },

    #[error("Selection cancelled")]
    Cancelled,
}

impl SelectionError {
    /// True when an external service is at fault rather than the input.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            SelectionError::QueryEmbedding(_)
                | SelectionError::Extraction(_)
                | SelectionError::ChunkFailed { .. }
                | SelectionError::AllChunksFailed { .. }
        )
    }
}
