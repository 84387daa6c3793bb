use std::collections::BTreeSet;

use index::{KnowledgeGraph, Relationship};

use crate::selector::RankedChunk;

const MAX_ENTITIES: usize = 10;
const MAX_RELATIONSHIPS: usize = 10;

/// Render selected chunks, plus the entities and relationships they mention,
/// into the context block handed to an answer generator.
pub fn build_context(chunks: &[RankedChunk], graph: &KnowledgeGraph) -> String {
    let mut context = String::new();

    context.push_str("RELEVANT TEXT CHUNKS:\n");
    for (i, chunk) in chunks.iter().enumerate() {
        context.push_str(&format!("[Chunk {}] {}\n\n", i + 1, chunk.text));
    }

    // Entities in rank order, first mention wins
    let mut seen = BTreeSet::new();
    let entities: Vec<_> = chunks
        .iter()
        .flat_map(|c| graph.chunk_entities(&c.chunk_id))
        .filter(|name| seen.insert(name.clone()))
        .filter_map(|name| graph.entity(&name))
        .take(MAX_ENTITIES)
        .collect();

    if !entities.is_empty() {
        context.push_str("\nRELEVANT ENTITIES:\n");
        for entity in &entities {
            context.push_str(&format!("- {} ({})\n", entity.name, entity.entity_type));
        }
    }

    let mut seen_relations = BTreeSet::new();
    let relations: Vec<&Relationship> = entities
        .iter()
        .flat_map(|e| graph.entity_relationships(&e.name))
        .filter(|r| seen_relations.insert(r.key()))
        .take(MAX_RELATIONSHIPS)
        .collect();

    if !relations.is_empty() {
        context.push_str("\nKEY RELATIONSHIPS:\n");
        for relation in relations {
            context.push_str(&format!(
                "- {} {} {} (Evidence: chunk {})\n",
                relation.source, relation.relation, relation.target, relation.chunk_id
            ));
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ChunkScores;
    use index::{ChunkId, Metadata};

    fn graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        graph.add_entity("Paris", "LOCATION", Metadata::new());
        graph.add_entity("France", "LOCATION", Metadata::new());
        graph.add_chunk_with(0u64, "Paris is the capital of France.", None, ["Paris", "France"]);
        graph.add_chunk(1u64, "Bread is baked daily.");
        graph.add_relationship("Paris", "CAPITAL_OF", "France", 0u64);
        graph
    }

    fn ranked(graph: &KnowledgeGraph, id: u64) -> RankedChunk {
        let chunk = graph.chunk(&ChunkId::from(id)).unwrap();
        RankedChunk {
            chunk_id: chunk.id.clone(),
            text: chunk.text.clone(),
            scores: ChunkScores::default(),
            total_score: 0.5,
        }
    }

    #[test]
    fn test_context_sections() {
        let graph = graph();
        let context = build_context(&[ranked(&graph, 0), ranked(&graph, 1)], &graph);

        assert!(context.starts_with("RELEVANT TEXT CHUNKS:\n[Chunk 1] Paris is the capital"));
        assert!(context.contains("[Chunk 2] Bread is baked daily."));
        assert!(context.contains("- France (LOCATION)"));
        assert!(context.contains("- Paris CAPITAL_OF France (Evidence: chunk 0)"));
        assert_eq!(context.matches("CAPITAL_OF").count(), 1);
    }

    #[test]
    fn test_context_without_entities() {
        let graph = graph();
        let context = build_context(&[ranked(&graph, 1)], &graph);

        assert!(!context.contains("RELEVANT ENTITIES"));
        assert!(!context.contains("KEY RELATIONSHIPS"));
    }
}
