use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use extract::EntityExtractor;
use index::{ChunkId, ChunkNode, EmbeddingProvider, KnowledgeGraph, ProviderError, SharedGraph};

use crate::cache::EmbeddingCache;
use crate::config::{AppConfig, FaultTolerance, SelectionConfig};
use crate::error::{ScoringError, SelectionError};
use crate::metrics::{Metrics, TimedOperation};
use crate::retry::RetryPolicy;
use crate::scorer::{ChunkScores, QueryContext, RelevanceScorer, ScoringWeights};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedChunk {
    pub chunk_id: ChunkId,
    pub text: String,
    pub scores: ChunkScores,
    pub total_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    ProviderError,
    Timeout,
}

/// A chunk left out of the ranking because it could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedChunk {
    pub chunk_id: ChunkId,
    pub reason: ExclusionReason,
    pub detail: String,
}

/// Result of a selection pass. `NoRelevantContent` means scoring worked but
/// nothing passed the filters; provider outages surface as
/// [`SelectionError`] instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Selection {
    Ranked {
        chunks: Vec<RankedChunk>,
        excluded: Vec<ExcludedChunk>,
    },
    NoRelevantContent {
        excluded: Vec<ExcludedChunk>,
    },
}

impl Selection {
    pub fn chunks(&self) -> &[RankedChunk] {
        match self {
            Selection::Ranked { chunks, .. } => chunks,
            Selection::NoRelevantContent { .. } => &[],
        }
    }

    pub fn excluded(&self) -> &[ExcludedChunk] {
        match self {
            Selection::Ranked { excluded, .. } | Selection::NoRelevantContent { excluded } => {
                excluded
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks().is_empty()
    }
}

/// Per-call options. Unset fields fall back to the selector's config.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub max_chunks: Option<usize>,
    pub weights: Option<ScoringWeights>,
    pub cancel: Option<CancellationToken>,
}

impl SelectionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = Some(max_chunks);
        self
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

enum ChunkOutcome {
    Scored(RankedChunk),
    Excluded(ExcludedChunk),
}

/// Scores every chunk of a graph against a query and keeps the best ones.
pub struct ChunkSelector<E, X> {
    embedder: E,
    extractor: X,
    selection: SelectionConfig,
    max_concurrent: usize,
    per_chunk_timeout: Duration,
    retry: RetryPolicy,
    cache: Option<EmbeddingCache>,
    metrics: Arc<Metrics>,
}

impl<E, X> ChunkSelector<E, X>
where
    E: EmbeddingProvider,
    X: EntityExtractor,
{
    pub fn new(embedder: E, extractor: X, config: &AppConfig) -> Self {
        Self {
            embedder,
            extractor,
            selection: config.selection.clone(),
            max_concurrent: config.concurrency.max_concurrent_embeddings.max(1),
            per_chunk_timeout: config.concurrency.per_chunk_timeout(),
            retry: RetryPolicy::from_config(&config.retry),
            cache: config
                .cache
                .enabled
                .then(|| EmbeddingCache::new(config.cache.max_entries)),
            metrics: Metrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share a cache between selectors
    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.selection
    }

    /// Select against a shared graph, holding its read lock for the whole pass
    pub async fn select_shared(
        &self,
        query: &str,
        graph: &SharedGraph,
        request: SelectionRequest,
    ) -> Result<Selection, SelectionError> {
        let guard = graph.read().await;
        self.select(query, &guard, request).await
    }

    pub async fn select(
        &self,
        query: &str,
        graph: &KnowledgeGraph,
        request: SelectionRequest,
    ) -> Result<Selection, SelectionError> {
        let selection_id = Uuid::new_v4();
        let span = info_span!("selection", %selection_id, chunks = graph.chunk_count());
        let timer = TimedOperation::start();

        let result = self.run_selection(query, graph, request).instrument(span).await;

        let empty = matches!(result, Ok(Selection::NoRelevantContent { .. }));
        self.metrics.record_selection(timer.elapsed(), result.is_ok(), empty);
        result
    }

    async fn run_selection(
        &self,
        query: &str,
        graph: &KnowledgeGraph,
        request: SelectionRequest,
    ) -> Result<Selection, SelectionError> {
        let max_chunks = request.max_chunks.unwrap_or(self.selection.max_chunks);
        let weights = request.weights.unwrap_or(self.selection.weights);

        if query.trim().is_empty() {
            return Err(SelectionError::EmptyQuery);
        }
        if graph.chunk_count() == 0 {
            return Err(SelectionError::EmptyGraph);
        }
        if max_chunks == 0 {
            return Err(SelectionError::InvalidMaxChunks(max_chunks));
        }
        weights.validate()?;

        let cancel = request.cancel.as_ref();

        let context = cancellable(cancel, self.query_context(query)).await??;
        debug!(
            query_entities = context.entities.len(),
            dimensions = context.embedding.len(),
            "query prepared"
        );

        let scorer = RelevanceScorer::new(self.selection.relationship_weight);
        let context = &context;
        let scorer = &scorer;
        let weights = &weights;

        let outcomes: Vec<ChunkOutcome> = cancellable(
            cancel,
            stream::iter(
                graph
                    .chunks()
                    .map(|chunk| self.evaluate_chunk(context, chunk, graph, scorer, weights)),
            )
            .buffer_unordered(self.max_concurrent)
            .try_collect(),
        )
        .await??;

        let mut scored = Vec::new();
        let mut excluded = Vec::new();
        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Scored(chunk) => scored.push(chunk),
                ChunkOutcome::Excluded(chunk) => excluded.push(chunk),
            }
        }
        excluded.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        self.metrics.record_chunks(scored.len(), excluded.len());

        if scored.is_empty() {
            warn!(excluded = excluded.len(), "no chunk could be scored");
            return Err(SelectionError::AllChunksFailed { count: excluded.len() });
        }

        let chunks = rank(scored, max_chunks, self.selection.min_total_score);

        info!(
            returned = chunks.len(),
            excluded = excluded.len(),
            top_score = ?chunks.first().map(|c| c.total_score),
            "selection complete"
        );

        if chunks.is_empty() {
            Ok(Selection::NoRelevantContent { excluded })
        } else {
            Ok(Selection::Ranked { chunks, excluded })
        }
    }

    /// Extract query entities and embed the query, once per pass
    async fn query_context(&self, query: &str) -> Result<QueryContext, SelectionError> {
        let (entities, embedding) = tokio::join!(
            self.query_entities(query),
            self.cached_embedding("query_embedding", query)
        );

        let entities = entities?;
        let embedding = embedding.map_err(SelectionError::QueryEmbedding)?;

        Ok(QueryContext::new(query, embedding, entities))
    }

    async fn query_entities(&self, query: &str) -> Result<Vec<String>, SelectionError> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get_query_entities(query)) {
            return Ok(cached);
        }

        match self.extractor.extract(query).await {
            Ok(result) => {
                let names = result.entity_names();
                if let Some(cache) = &self.cache {
                    cache.set_query_entities(query, names.clone());
                }
                Ok(names)
            }
            Err(e) if self.selection.propagate_extraction_errors => {
                Err(SelectionError::Extraction(e))
            }
            Err(e) => {
                warn!(error = %e, "query entity extraction failed, scoring without query entities");
                Ok(Vec::new())
            }
        }
    }

    async fn evaluate_chunk(
        &self,
        context: &QueryContext,
        chunk: &ChunkNode,
        graph: &KnowledgeGraph,
        scorer: &RelevanceScorer,
        weights: &ScoringWeights,
    ) -> Result<ChunkOutcome, SelectionError> {
        let scored = tokio::time::timeout(self.per_chunk_timeout, async {
            let embedding = self.chunk_embedding(chunk).await?;
            scorer.score_chunk(context, chunk, &embedding, graph)
        })
        .await;

        let scored = match scored {
            Ok(result) => result,
            Err(_) => {
                self.metrics.record_timeout();
                Err(ScoringError::Timeout(self.per_chunk_timeout))
            }
        };

        match scored {
            Ok(scores) => Ok(ChunkOutcome::Scored(RankedChunk {
                chunk_id: chunk.id.clone(),
                text: chunk.text.clone(),
                total_score: scores.total(weights),
                scores,
            })),
            Err(ScoringError::DimensionMismatch { query, chunk: dimensions }) => {
                Err(SelectionError::DimensionMismatch {
                    chunk_id: chunk.id.clone(),
                    query,
                    chunk: dimensions,
                })
            }
            Err(e) if self.selection.fault_tolerance == FaultTolerance::FailFast => {
                Err(SelectionError::ChunkFailed {
                    chunk_id: chunk.id.clone(),
                    source: e,
                })
            }
            Err(e) => {
                warn!(chunk_id = %chunk.id, error = %e, "chunk excluded from ranking");
                let reason = match e {
                    ScoringError::Timeout(_) => ExclusionReason::Timeout,
                    _ => ExclusionReason::ProviderError,
                };
                Ok(ChunkOutcome::Excluded(ExcludedChunk {
                    chunk_id: chunk.id.clone(),
                    reason,
                    detail: e.to_string(),
                }))
            }
        }
    }

    /// Stored embedding if the chunk has one, otherwise the provider's
    async fn chunk_embedding<'a>(
        &self,
        chunk: &'a ChunkNode,
    ) -> Result<Cow<'a, [f32]>, ProviderError> {
        match &chunk.embedding {
            Some(embedding) => Ok(Cow::Borrowed(embedding.as_slice())),
            None => Ok(Cow::Owned(self.cached_embedding("chunk_embedding", &chunk.text).await?)),
        }
    }

    async fn cached_embedding(
        &self,
        operation: &str,
        text: &str,
    ) -> Result<Vec<f32>, ProviderError> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get_embedding(text)) {
            return Ok(hit);
        }

        let embedding = self
            .retry
            .retry_if(operation, || self.embedder.embed(text), ProviderError::is_transient)
            .await?;

        if let Some(cache) = &self.cache {
            cache.set_embedding(text, embedding.clone());
        }
        Ok(embedding)
    }
}

/// Caller-facing retrieval entry point: rank `graph`'s chunks for `query`
/// and keep at most `max_chunks`.
pub async fn select_relevant_chunks<E, X>(
    selector: &ChunkSelector<E, X>,
    query: &str,
    graph: &KnowledgeGraph,
    max_chunks: usize,
    weights: Option<ScoringWeights>,
) -> Result<Selection, SelectionError>
where
    E: EmbeddingProvider,
    X: EntityExtractor,
{
    let mut request = SelectionRequest::new().with_max_chunks(max_chunks);
    request.weights = weights;
    selector.select(query, graph, request).await
}

/// Drop chunks under `min_total_score`, sort by total descending with ties
/// broken by ascending chunk id, and keep the first `max_chunks`.
pub fn rank(
    mut chunks: Vec<RankedChunk>,
    max_chunks: usize,
    min_total_score: Option<f64>,
) -> Vec<RankedChunk> {
    if let Some(min) = min_total_score {
        chunks.retain(|c| c.total_score >= min);
    }
    chunks.sort_by(|a, b| {
        b.total_score
            .total_cmp(&a.total_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    chunks.truncate(max_chunks);
    chunks
}

async fn cancellable<F: Future>(
    cancel: Option<&CancellationToken>,
    future: F,
) -> Result<F::Output, SelectionError> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(SelectionError::Cancelled),
            output = future => Ok(output),
        },
        None => Ok(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(id: u64, total: f64) -> RankedChunk {
        RankedChunk {
            chunk_id: ChunkId::from(id),
            text: format!("chunk {id}"),
            scores: ChunkScores::default(),
            total_score: total,
        }
    }

    #[test]
    fn test_rank_orders_and_truncates() {
        let result = rank(vec![ranked(0, 0.9), ranked(1, 0.5), ranked(2, 0.7)], 2, None);
        let totals: Vec<f64> = result.iter().map(|c| c.total_score).collect();
        assert_eq!(totals, vec![0.9, 0.7]);
    }

    #[test]
    fn test_rank_breaks_ties_by_chunk_id() {
        let result = rank(vec![ranked(5, 0.4), ranked(2, 0.4), ranked(9, 0.4)], 3, None);
        let ids: Vec<ChunkId> = result.into_iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![ChunkId::from(2), ChunkId::from(5), ChunkId::from(9)]);
    }

    #[test]
    fn test_rank_applies_minimum() {
        let result = rank(vec![ranked(0, 0.9), ranked(1, 0.1)], 5, Some(0.5));
        assert_eq!(result.len(), 1);
        assert!(rank(vec![ranked(0, 0.1)], 5, Some(0.5)).is_empty());
    }

    #[test]
    fn test_selection_serialization() {
        let selection = Selection::Ranked {
            chunks: vec![ranked(3, 0.25)],
            excluded: vec![],
        };
        let value = serde_json::to_value(&selection).unwrap();

        assert_eq!(value["status"], "ranked");
        assert_eq!(value["chunks"][0]["chunkId"], 3);
        assert_eq!(value["chunks"][0]["totalScore"], 0.25);
        assert!(value["chunks"][0]["scores"]["relationship"].is_number());

        let empty =
            serde_json::to_value(Selection::NoRelevantContent { excluded: vec![] }).unwrap();
        assert_eq!(empty["status"], "no_relevant_content");
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let result = cancellable(Some(&token), async { 1 }).await;
        assert!(matches!(result, Err(SelectionError::Cancelled)));
        assert_eq!(cancellable(None, async { 1 }).await.unwrap(), 1);
    }
}
