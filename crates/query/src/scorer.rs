//! Per-chunk relevance signals.
//!
//! Four independent sub-scores are computed for each chunk and combined
//! linearly:
//!
//! | signal       | range     | source                                   |
//! |--------------|-----------|------------------------------------------|
//! | semantic     | [-1, 1]   | cosine of query and chunk embeddings     |
//! | entity       | [0, 1]    | overlap of query and chunk entity sets   |
//! | relationship | [0, ∞)    | relationship count of the chunk entities |
//! | position     | (0, 1]    | earlier chunks score higher              |
//!
//! The relationship signal is not normalized, so a chunk whose entities take
//! part in many relationships can outweigh the bounded signals.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use index::{ChunkId, ChunkNode, KnowledgeGraph};

use crate::error::{ScoringError, SelectionError};

/// Contribution of each relationship of each chunk entity.
pub const DEFAULT_RELATIONSHIP_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub semantic: f64,
    pub entity: f64,
    pub relationship: f64,
    pub position: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.3,
            entity: 0.4,
            relationship: 0.2,
            position: 0.1,
        }
    }
}

impl ScoringWeights {
    /// Weight set that ignores relationship density.
    pub fn without_relationships() -> Self {
        Self {
            semantic: 0.3,
            entity: 0.3,
            relationship: 0.0,
            position: 0.1,
        }
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        for (field, value) in [
            ("semantic", self.semantic),
            ("entity", self.entity),
            ("relationship", self.relationship),
            ("position", self.position),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SelectionError::InvalidWeights { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkScores {
    pub semantic: f64,
    pub entity: f64,
    pub relationship: f64,
    pub position: f64,
}

impl ChunkScores {
    pub fn total(&self, weights: &ScoringWeights) -> f64 {
        self.semantic * weights.semantic
            + self.entity * weights.entity
            + self.relationship * weights.relationship
            + self.position * weights.position
    }
}

/// Query-side inputs, computed once per selection pass.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub text: String,
    pub embedding: Vec<f32>,
    /// Lowercased entity names
    pub entities: HashSet<String>,
}

impl QueryContext {
    pub fn new<I, S>(text: &str, embedding: Vec<f32>, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            text: text.to_string(),
            embedding,
            entities: lowercase_set(entities),
        }
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// Zero-norm input scores 0. Vectors of different length are rejected.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, ScoringError> {
    if a.len() != b.len() {
        return Err(ScoringError::DimensionMismatch {
            query: a.len(),
            chunk: b.len(),
        });
    }

    let (dot, norm_a, norm_b) =
        a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, na, nb), (x, y)| {
            let (x, y) = (f64::from(*x), f64::from(*y));
            (d + x * y, na + x * x, nb + y * y)
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Case-insensitive overlap divided by the larger set size. 0 if either set
/// is empty.
pub fn entity_score<Q, C>(query_entities: Q, chunk_entities: C) -> f64
where
    Q: IntoIterator,
    Q::Item: AsRef<str>,
    C: IntoIterator,
    C::Item: AsRef<str>,
{
    let query = lowercase_set(query_entities);
    let chunk = lowercase_set(chunk_entities);

    if query.is_empty() || chunk.is_empty() {
        return 0.0;
    }

    let overlap = query.intersection(&chunk).count();
    overlap as f64 / query.len().max(chunk.len()) as f64
}

/// Sum over the chunk's entities of `relationship count × weight`.
/// Unknown chunks and entities contribute nothing.
pub fn relationship_score(graph: &KnowledgeGraph, chunk_id: &ChunkId, weight: f64) -> f64 {
    graph
        .chunk_entities(chunk_id)
        .iter()
        .map(|name| graph.entity_relationships(name).len() as f64 * weight)
        .sum()
}

/// `1 - index / total`; 0 for an empty graph.
pub fn position_score(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (1.0 - index as f64 / total as f64).max(0.0)
}

fn lowercase_set<I>(names: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct RelevanceScorer {
    relationship_weight: f64,
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(DEFAULT_RELATIONSHIP_WEIGHT)
    }
}

impl RelevanceScorer {
    pub fn new(relationship_weight: f64) -> Self {
        Self { relationship_weight }
    }

    /// Compute all four sub-scores for one chunk.
    pub fn score_chunk(
        &self,
        query: &QueryContext,
        chunk: &ChunkNode,
        chunk_embedding: &[f32],
        graph: &KnowledgeGraph,
    ) -> Result<ChunkScores, ScoringError> {
        Ok(ChunkScores {
            semantic: cosine_similarity(&query.embedding, chunk_embedding)?,
            entity: entity_score(&query.entities, &chunk.entities),
            relationship: relationship_score(graph, &chunk.id, self.relationship_weight),
            position: position_score(chunk.position, graph.chunk_count()),
        })
    }
}
