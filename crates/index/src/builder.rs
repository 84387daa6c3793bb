use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use extract::{EntityExtractor, ExtractionResult};

use crate::embeddings::EmbeddingProvider;
use crate::graph::{ChunkId, IngestReport, InsertOutcome, KnowledgeGraph};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub chunks_added: usize,
    /// Chunks whose id already existed; their text was replaced
    pub chunks_replaced: usize,
    pub extraction_failures: usize,
    pub embedding_failures: usize,
    pub ingest: IngestReport,
}

/// Populates a graph from already-split chunk texts.
pub struct GraphBuilder {
    extractor: Arc<dyn EntityExtractor>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    max_concurrent: usize,
}

struct Processed {
    id: ChunkId,
    extraction: Option<ExtractionResult>,
    embedding: Option<Vec<f32>>,
    embedding_failed: bool,
}

impl GraphBuilder {
    pub fn new(extractor: Arc<dyn EntityExtractor>) -> Self {
        Self {
            extractor,
            embedder: None,
            max_concurrent: 5,
        }
    }

    /// Also store an embedding for every chunk
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Append texts under fresh numeric ids, starting after the largest
    /// numeric id already in the graph
    pub async fn ingest_texts<I, S>(&self, graph: &mut KnowledgeGraph, texts: I) -> BuildReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let offset = graph
            .chunks()
            .filter_map(|chunk| match chunk.id {
                ChunkId::Index(i) => Some(i + 1),
                ChunkId::Key(_) => None,
            })
            .max()
            .unwrap_or(0);
        let chunks = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| (ChunkId::Index(offset + i as u64), text.into()))
            .collect();
        self.ingest(graph, chunks).await
    }

    /// Add chunks, then extract (and optionally embed) them with bounded
    /// concurrency. Results are applied in input order. A chunk whose
    /// extraction fails is kept without entities. Reusing an existing id
    /// replaces that chunk's text and is counted in `chunks_replaced`.
    pub async fn ingest(
        &self,
        graph: &mut KnowledgeGraph,
        chunks: Vec<(ChunkId, String)>,
    ) -> BuildReport {
        let mut report = BuildReport::default();

        for (id, text) in &chunks {
            match graph.add_chunk(id.clone(), text) {
                InsertOutcome::Updated => {
                    warn!(chunk_id = %id, "chunk id already present, text replaced");
                    report.chunks_replaced += 1;
                }
                _ => report.chunks_added += 1,
            }
        }

        let tasks = chunks.into_iter().map(|(id, text)| async move {
            let extraction = match self.extractor.extract(&text).await {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(
                        chunk_id = %id,
                        error = %e,
                        "extraction failed, chunk kept without entities"
                    );
                    None
                }
            };

            let (embedding, embedding_failed) = match &self.embedder {
                Some(embedder) => match embedder.embed(&text).await {
                    Ok(vector) => (Some(vector), false),
                    Err(e) => {
                        warn!(chunk_id = %id, error = %e, "chunk embedding failed");
                        (None, true)
                    }
                },
                None => (None, false),
            };

            Processed {
                id,
                extraction,
                embedding,
                embedding_failed,
            }
        });

        let processed: Vec<Processed> =
            stream::iter(tasks).buffered(self.max_concurrent).collect().await;

        for item in processed {
            match item.extraction {
                Some(extraction) => report.ingest += graph.ingest_extraction(&item.id, &extraction),
                None => report.extraction_failures += 1,
            }
            if let Some(vector) = item.embedding {
                graph.set_chunk_embedding(&item.id, vector);
            }
            if item.embedding_failed {
                report.embedding_failures += 1;
            }
        }

        info!(
            chunks = report.chunks_added,
            replaced = report.chunks_replaced,
            entities_created = report.ingest.entities_created,
            relationships_created = report.ingest.relationships_created,
            extraction_failures = report.extraction_failures,
            "graph build complete"
        );

        report
    }
}
