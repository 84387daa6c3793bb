use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, warn};

use extract::ExtractionResult;

/// Free-form entity attributes.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Chunk identifier, either a positional index or an opaque key.
///
/// Ordering puts every `Index` before every `Key`; indices compare
/// numerically and keys lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkId {
    Index(u64),
    Key(String),
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkId::Index(i) => write!(f, "{}", i),
            ChunkId::Key(k) => f.write_str(k),
        }
    }
}

impl From<u64> for ChunkId {
    fn from(value: u64) -> Self {
        ChunkId::Index(value)
    }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self {
        ChunkId::Key(value.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(value: String) -> Self {
        ChunkId::Key(value)
    }
}

/// Composite relationship key. Two insertions with the same triple map to
/// the same stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationKey {
    pub source: String,
    pub relation: String,
    pub target: String,
}

impl RelationKey {
    pub fn new(source: &str, relation: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            relation: relation.to_string(),
            target: target.to_string(),
        }
    }
}

/// `source|relation|target`. A backslash or `|` inside a part is prefixed
/// with a backslash, so distinct keys never share a label.
impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            escape_label_part(&self.source),
            escape_label_part(&self.relation),
            escape_label_part(&self.target)
        )
    }
}

fn escape_label_part(part: &str) -> Cow<'_, str> {
    if part.contains(['\\', '|']) {
        Cow::Owned(part.replace('\\', "\\\\").replace('|', "\\|"))
    } else {
        Cow::Borrowed(part)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    pub name: String,
    pub entity_type: String,
    pub metadata: Metadata,
    pub connected_chunks: BTreeSet<ChunkId>,
    pub relationships: BTreeSet<RelationKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkNode {
    pub id: ChunkId,
    pub text: String,
    /// Insertion order within the graph, used for positional scoring
    pub position: usize,
    pub embedding: Option<Vec<f32>>,
    /// Entities mentioned in this chunk, explicit or connected
    pub entities: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub chunk_id: ChunkId,
}

impl Relationship {
    pub fn key(&self) -> RelationKey {
        RelationKey::new(&self.source, &self.relation, &self.target)
    }
}

/// Which branch an insert took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Updated,
    AlreadyExists,
    RejectedMissingReference,
}

impl InsertOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, InsertOutcome::Created | InsertOutcome::Updated)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub chunk_count: usize,
    pub relationship_count: usize,
}

/// Counts from ingesting one extraction result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub entities_created: usize,
    pub links_created: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub rejected: usize,
}

impl std::ops::AddAssign for IngestReport {
    fn add_assign(&mut self, other: Self) {
        self.entities_created += other.entities_created;
        self.links_created += other.links_created;
        self.relationships_created += other.relationships_created;
        self.relationships_updated += other.relationships_updated;
        self.rejected += other.rejected;
    }
}

/// In-memory knowledge graph for one processing session.
///
/// Lookups on unknown names or ids return empty results. Every chunk id held
/// in an entity's `connected_chunks` refers to a chunk in the graph; links to
/// unknown chunks are rejected at insert time.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    pub(crate) entities: HashMap<String, EntityNode>,
    pub(crate) chunks: HashMap<ChunkId, ChunkNode>,
    pub(crate) chunk_order: Vec<ChunkId>,
    pub(crate) relationships: HashMap<RelationKey, Relationship>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity if absent. Existing metadata is never overwritten.
    pub fn add_entity(
        &mut self,
        name: &str,
        entity_type: &str,
        metadata: Metadata,
    ) -> InsertOutcome {
        if self.entities.contains_key(name) {
            return InsertOutcome::AlreadyExists;
        }

        self.entities.insert(
            name.to_string(),
            EntityNode {
                name: name.to_string(),
                entity_type: entity_type.to_string(),
                metadata,
                connected_chunks: BTreeSet::new(),
                relationships: BTreeSet::new(),
            },
        );
        InsertOutcome::Created
    }

    /// Insert a chunk or overwrite its text. An overwritten chunk keeps its
    /// position and loses any stored embedding.
    pub fn add_chunk(&mut self, id: impl Into<ChunkId>, text: &str) -> InsertOutcome {
        let id = id.into();

        if let Some(chunk) = self.chunks.get_mut(&id) {
            chunk.text = text.to_string();
            chunk.embedding = None;
            return InsertOutcome::Updated;
        }

        let position = self.chunk_order.len();
        self.chunk_order.push(id.clone());
        self.chunks.insert(
            id.clone(),
            ChunkNode {
                id,
                text: text.to_string(),
                position,
                embedding: None,
                entities: BTreeSet::new(),
            },
        );
        InsertOutcome::Created
    }

    /// Ingestion-time insert carrying an optional precomputed embedding and
    /// the entity names associated with the chunk. Names that already exist
    /// as entities are linked both ways.
    pub fn add_chunk_with<I, S>(
        &mut self,
        id: impl Into<ChunkId>,
        text: &str,
        embedding: Option<Vec<f32>>,
        entities: I,
    ) -> InsertOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let outcome = self.add_chunk(id.clone(), text);

        let names: Vec<String> = entities.into_iter().map(Into::into).collect();
        if let Some(chunk) = self.chunks.get_mut(&id) {
            chunk.embedding = embedding;
            chunk.entities.extend(names.iter().cloned());
        }
        for name in &names {
            if let Some(entity) = self.entities.get_mut(name) {
                entity.connected_chunks.insert(id.clone());
            }
        }

        outcome
    }

    pub fn set_chunk_embedding(&mut self, id: &ChunkId, embedding: Vec<f32>) -> InsertOutcome {
        match self.chunks.get_mut(id) {
            Some(chunk) => {
                let outcome = if chunk.embedding.is_some() {
                    InsertOutcome::Updated
                } else {
                    InsertOutcome::Created
                };
                chunk.embedding = Some(embedding);
                outcome
            }
            None => {
                warn!(chunk_id = %id, "cannot store embedding for unknown chunk");
                InsertOutcome::RejectedMissingReference
            }
        }
    }

    /// Link an entity to a chunk it appears in. Both must already exist.
    pub fn connect_entity_to_chunk(
        &mut self,
        entity_name: &str,
        chunk_id: &ChunkId,
    ) -> InsertOutcome {
        let Some(chunk) = self.chunks.get_mut(chunk_id) else {
            warn!(entity = entity_name, chunk_id = %chunk_id, "link rejected: chunk not found");
            return InsertOutcome::RejectedMissingReference;
        };
        let Some(entity) = self.entities.get_mut(entity_name) else {
            warn!(entity = entity_name, chunk_id = %chunk_id, "link rejected: entity not found");
            return InsertOutcome::RejectedMissingReference;
        };

        chunk.entities.insert(entity_name.to_string());
        if entity.connected_chunks.insert(chunk_id.clone()) {
            InsertOutcome::Created
        } else {
            InsertOutcome::AlreadyExists
        }
    }

    /// Upsert a relationship. Re-adding the same triple replaces the chunk
    /// association (last write wins). The key is indexed only under endpoints
    /// that exist as entities.
    pub fn add_relationship(
        &mut self,
        source: &str,
        relation: &str,
        target: &str,
        chunk_id: impl Into<ChunkId>,
    ) -> InsertOutcome {
        let chunk_id = chunk_id.into();
        let key = RelationKey::new(source, relation, target);

        let previous = self.relationships.insert(
            key.clone(),
            Relationship {
                source: source.to_string(),
                target: target.to_string(),
                relation: relation.to_string(),
                chunk_id: chunk_id.clone(),
            },
        );

        for endpoint in [source, target] {
            match self.entities.get_mut(endpoint) {
                Some(entity) => {
                    entity.relationships.insert(key.clone());
                }
                None => {
                    debug!(entity = endpoint, key = %key, "relationship endpoint is not an entity")
                }
            }
        }

        match previous {
            Some(old) => {
                if old.chunk_id != chunk_id {
                    debug!(
                        key = %key,
                        from = %old.chunk_id,
                        to = %chunk_id,
                        "relationship chunk reassigned"
                    );
                }
                InsertOutcome::Updated
            }
            None => InsertOutcome::Created,
        }
    }

    /// Relationships registered under an entity, empty when unknown.
    pub fn entity_relationships(&self, entity_name: &str) -> Vec<&Relationship> {
        self.entities
            .get(entity_name)
            .map(|entity| {
                entity
                    .relationships
                    .iter()
                    .filter_map(|key| self.relationships.get(key))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Union of the chunks connected to the given entities. Unknown names and
    /// dangling chunk ids are skipped.
    pub fn chunks_for_entities<I, S>(&self, entity_names: I) -> BTreeSet<ChunkId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        entity_names
            .into_iter()
            .filter_map(|name| self.entities.get(name.as_ref()))
            .flat_map(|entity| entity.connected_chunks.iter())
            .filter(|id| self.chunks.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Entity names associated with a chunk, empty when unknown.
    pub fn chunk_entities(&self, chunk_id: &ChunkId) -> BTreeSet<String> {
        self.chunks
            .get(chunk_id)
            .map(|chunk| chunk.entities.clone())
            .unwrap_or_default()
    }

    /// Add everything one extractor call reported for a chunk.
    ///
    /// Relationship endpoints that were not reported as entities are created
    /// with type `UNKNOWN` so the relationship is indexed under both ends.
    pub fn ingest_extraction(
        &mut self,
        chunk_id: &ChunkId,
        extraction: &ExtractionResult,
    ) -> IngestReport {
        let mut report = IngestReport::default();

        for entity in &extraction.entities {
            let outcome = self.add_entity(&entity.text, &entity.entity_type, Metadata::new());
            if outcome == InsertOutcome::Created {
                report.entities_created += 1;
            }
            self.record_link(&entity.text, chunk_id, &mut report);
        }

        for relationship in &extraction.relationships {
            for endpoint in [&relationship.source, &relationship.target] {
                let mut metadata = Metadata::new();
                metadata.insert("auto_created".to_string(), serde_json::Value::Bool(true));
                if self.add_entity(endpoint, "UNKNOWN", metadata) == InsertOutcome::Created {
                    report.entities_created += 1;
                    self.record_link(endpoint, chunk_id, &mut report);
                }
            }

            match self.add_relationship(
                &relationship.source,
                &relationship.relationship,
                &relationship.target,
                chunk_id.clone(),
            ) {
                InsertOutcome::Created => report.relationships_created += 1,
                InsertOutcome::Updated => report.relationships_updated += 1,
                _ => report.rejected += 1,
            }
        }

        report
    }

    fn record_link(&mut self, entity_name: &str, chunk_id: &ChunkId, report: &mut IngestReport) {
        match self.connect_entity_to_chunk(entity_name, chunk_id) {
            InsertOutcome::Created => report.links_created += 1,
            InsertOutcome::RejectedMissingReference => report.rejected += 1,
            _ => {}
        }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityNode> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityNode> {
        self.entities.values()
    }

    pub fn chunk(&self, id: &ChunkId) -> Option<&ChunkNode> {
        self.chunks.get(id)
    }

    /// Chunks in insertion order
    pub fn chunks(&self) -> impl Iterator<Item = &ChunkNode> {
        self.chunk_order.iter().filter_map(|id| self.chunks.get(id))
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.chunks.is_empty() && self.relationships.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            entity_count: self.entity_count(),
            chunk_count: self.chunk_count(),
            relationship_count: self.relationship_count(),
        }
    }

    /// Empty all collections before reprocessing a new source
    pub fn clear(&mut self) {
        self.entities.clear();
        self.chunks.clear();
        self.chunk_order.clear();
        self.relationships.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{ExtractedEntity, ExtractedRelationship};

    fn geography() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        graph.add_chunk(0, "Paris is the capital of France.");
        graph.add_chunk(1, "Berlin is the capital of Germany.");
        for (name, chunk) in [("Paris", 0), ("France", 0), ("Berlin", 1), ("Germany", 1)] {
            graph.add_entity(name, "LOCATION", Metadata::new());
            graph.connect_entity_to_chunk(name, &ChunkId::from(chunk));
        }
        graph
    }

    #[test]
    fn test_add_entity_is_idempotent() {
        let mut graph = KnowledgeGraph::new();
        let mut metadata = Metadata::new();
        metadata.insert("origin".to_string(), "first".into());

        assert_eq!(graph.add_entity("X", "TYPE", metadata), InsertOutcome::Created);
        assert_eq!(graph.add_entity("X", "OTHER", Metadata::new()), InsertOutcome::AlreadyExists);

        assert_eq!(graph.entity_count(), 1);
        let entity = graph.entity("X").unwrap();
        assert_eq!(entity.entity_type, "TYPE");
        assert_eq!(entity.metadata["origin"], "first");
    }

    #[test]
    fn test_entity_names_are_case_sensitive() {
        let mut graph = KnowledgeGraph::new();
        graph.add_entity("paris", "LOCATION", Metadata::new());
        graph.add_entity("Paris", "LOCATION", Metadata::new());
        assert_eq!(graph.entity_count(), 2);
    }

    #[test]
    fn test_relationship_last_write_wins() {
        let mut graph = KnowledgeGraph::new();
        graph.add_entity("A", "T", Metadata::new());
        graph.add_entity("B", "T", Metadata::new());

        assert_eq!(graph.add_relationship("A", "REL", "B", 1), InsertOutcome::Created);
        assert_eq!(graph.add_relationship("A", "REL", "B", 2), InsertOutcome::Updated);

        assert_eq!(graph.relationship_count(), 1);
        let rels = graph.entity_relationships("A");
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].chunk_id, ChunkId::Index(2));
        assert_eq!(graph.entity_relationships("B").len(), 1);
    }

    #[test]
    fn test_relationship_with_missing_endpoint() {
        let mut graph = KnowledgeGraph::new();
        graph.add_entity("A", "T", Metadata::new());

        graph.add_relationship("A", "KNOWS", "Ghost", "c1");

        assert_eq!(graph.relationship_count(), 1);
        assert_eq!(graph.entity_relationships("A").len(), 1);
        assert!(graph.entity_relationships("Ghost").is_empty());
    }

    #[test]
    fn test_unknown_lookups_are_empty() {
        let graph = geography();
        assert!(graph.entity_relationships("nonexistent").is_empty());
        assert!(graph.chunks_for_entities(["nonexistent"]).is_empty());
        assert!(graph.chunk_entities(&ChunkId::from(42)).is_empty());
    }

    #[test]
    fn test_connect_rejects_missing_references() {
        let mut graph = geography();

        assert_eq!(
            graph.connect_entity_to_chunk("Rome", &ChunkId::from(0)),
            InsertOutcome::RejectedMissingReference
        );
        assert_eq!(
            graph.connect_entity_to_chunk("Paris", &ChunkId::from(9)),
            InsertOutcome::RejectedMissingReference
        );
        assert_eq!(
            graph.connect_entity_to_chunk("Paris", &ChunkId::from(0)),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(graph.entity("Paris").unwrap().connected_chunks.len(), 1);
    }

    #[test]
    fn test_chunks_for_entities_deduplicates() {
        let mut graph = geography();
        graph.connect_entity_to_chunk("France", &ChunkId::from(1));

        let chunks = graph.chunks_for_entities(["Paris", "France", "Unknown"]);

        assert_eq!(
            chunks.into_iter().collect::<Vec<_>>(),
            vec![ChunkId::from(0), ChunkId::from(1)]
        );
    }

    #[test]
    fn test_overwriting_chunk_keeps_position() {
        let mut graph = geography();
        graph.set_chunk_embedding(&ChunkId::from(0), vec![1.0, 0.0]);

        assert_eq!(graph.add_chunk(0, "Paris, France."), InsertOutcome::Updated);

        let chunk = graph.chunk(&ChunkId::from(0)).unwrap();
        assert_eq!(chunk.position, 0);
        assert_eq!(chunk.text, "Paris, France.");
        assert!(chunk.embedding.is_none());
        assert_eq!(graph.chunks().map(|c| c.position).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_add_chunk_with_explicit_entities() {
        let mut graph = KnowledgeGraph::new();
        graph.add_entity("Rust", "TECHNOLOGY", Metadata::new());

        graph.add_chunk_with("intro", "Rust is fast.", Some(vec![0.5, 0.5]), ["Rust", "Speed"]);

        let id = ChunkId::from("intro");
        assert_eq!(graph.chunk_entities(&id).len(), 2);
        assert!(graph.entity("Rust").unwrap().connected_chunks.contains(&id));
        assert!(graph.chunk(&id).unwrap().embedding.is_some());
    }

    #[test]
    fn test_relation_key_labels_are_distinct() {
        assert_eq!(
            RelationKey::new("Paris", "CAPITAL_OF", "France").to_string(),
            "Paris|CAPITAL_OF|France"
        );

        let left = RelationKey::new("A|B", "R", "C");
        let right = RelationKey::new("A", "B|R", "C");
        assert_eq!(left.to_string(), r"A\|B|R|C");
        assert_ne!(left.to_string(), right.to_string());
        assert_ne!(
            RelationKey::new(r"A\", "R", "C").to_string(),
            RelationKey::new("A", r"\R", "C").to_string()
        );
    }

    #[test]
    fn test_chunk_id_ordering() {
        let mut ids = vec![
            ChunkId::from("b"),
            ChunkId::from(10),
            ChunkId::from("a"),
            ChunkId::from(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![ChunkId::from(2), ChunkId::from(10), ChunkId::from("a"), ChunkId::from("b")]
        );
    }

    #[test]
    fn test_ingest_extraction() {
        let mut graph = KnowledgeGraph::new();
        let chunk = ChunkId::from(0);
        graph.add_chunk(0, "Paris is the capital of France.");

        let report = graph.ingest_extraction(
            &chunk,
            &ExtractionResult {
                entities: vec![ExtractedEntity::new("Paris", "LOCATION")],
                relationships: vec![ExtractedRelationship::new("Paris", "CAPITAL_OF", "France")],
            },
        );

        assert_eq!(report.entities_created, 2);
        assert_eq!(report.links_created, 2);
        assert_eq!(report.relationships_created, 1);
        assert_eq!(graph.entity("France").unwrap().entity_type, "UNKNOWN");
        assert_eq!(graph.entity_relationships("France").len(), 1);
        assert_eq!(graph.chunk_entities(&chunk).len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut graph = geography();
        graph.add_relationship("Paris", "CAPITAL_OF", "France", 0);

        graph.clear();

        assert!(graph.is_empty());
        assert_eq!(graph.stats(), GraphStats::default());
        assert_eq!(graph.chunks().count(), 0);
    }
}
