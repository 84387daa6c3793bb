pub mod builder;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod snapshot;

pub use builder::{BuildReport, GraphBuilder};
pub use embeddings::{EmbeddingClient, EmbeddingProvider};
pub use error::{ProviderError, SnapshotError};
pub use graph::{
    ChunkId, ChunkNode, EntityNode, GraphStats, IngestReport, InsertOutcome, KnowledgeGraph,
    Metadata, RelationKey, Relationship,
};
pub use snapshot::{ChunkRecord, EntityRecord, GraphSnapshot, RelationshipRecord};

use std::sync::Arc;
use tokio::sync::RwLock;

/// A graph shared between ingestion (writer) and selection (readers).
///
/// Selection holds the read guard for a whole pass, so a concurrent `clear`
/// waits until scoring finishes.
pub type SharedGraph = Arc<RwLock<KnowledgeGraph>>;

pub fn shared(graph: KnowledgeGraph) -> SharedGraph {
    Arc::new(RwLock::new(graph))
}
