//! Flat, serializable form of a [`KnowledgeGraph`].
//!
//! Sets are written as sorted arrays and rebuilt as sets on load, so
//! duplicate entries in a hand-edited file collapse on import.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use crate::error::SnapshotError;
use crate::graph::{ChunkId, EntityNode, KnowledgeGraph, Metadata, RelationKey, Relationship};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub chunks: Vec<ChunkRecord>,
    #[serde(default)]
    pub relationships: Vec<RelationshipRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub entity: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub connected_chunks: Vec<ChunkId>,
    #[serde(default)]
    pub relationships: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRecord {
    pub relation_key: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation: String,
    pub chunk_id: ChunkId,
}

impl KnowledgeGraph {
    /// Flatten the graph. Chunks keep insertion order; entities and
    /// relationships are sorted so output is stable.
    pub fn export(&self) -> GraphSnapshot {
        let mut entities: Vec<EntityRecord> = self
            .entities
            .values()
            .map(|entity| EntityRecord {
                entity: entity.name.clone(),
                entity_type: entity.entity_type.clone(),
                metadata: entity.metadata.clone(),
                connected_chunks: entity.connected_chunks.iter().cloned().collect(),
                relationships: entity.relationships.iter().map(|k| k.to_string()).collect(),
            })
            .collect();
        entities.sort_by(|a, b| a.entity.cmp(&b.entity));

        let chunks = self
            .chunks()
            .map(|chunk| ChunkRecord {
                chunk_id: chunk.id.clone(),
                text: chunk.text.clone(),
                embedding: chunk.embedding.clone(),
                entities: chunk.entities.iter().cloned().collect(),
            })
            .collect();

        let mut keys: Vec<&RelationKey> = self.relationships.keys().collect();
        keys.sort();
        let relationships = keys
            .into_iter()
            .filter_map(|key| self.relationships.get(key).map(|rel| (key, rel)))
            .map(|(key, rel)| RelationshipRecord {
                relation_key: key.to_string(),
                source: rel.source.clone(),
                target: rel.target.clone(),
                relation: rel.relation.clone(),
                chunk_id: rel.chunk_id.clone(),
            })
            .collect();

        GraphSnapshot {
            entities,
            chunks,
            relationships,
        }
    }

    /// Rebuild a graph from its flat form.
    ///
    /// Relationship keys are recomputed from their fields. References to
    /// chunks or relationship keys absent from the snapshot are dropped with
    /// a warning.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = KnowledgeGraph::new();

        for record in snapshot.chunks {
            graph.add_chunk(record.chunk_id.clone(), &record.text);
            if let Some(chunk) = graph.chunks.get_mut(&record.chunk_id) {
                chunk.embedding = record.embedding;
                chunk.entities.extend(record.entities);
            }
        }

        // Computed labels always win; a stale stored label only resolves
        // when no computed label claims it.
        let mut keys_by_label: HashMap<String, RelationKey> = HashMap::new();
        let mut stale_labels = Vec::new();
        for record in snapshot.relationships {
            let key = RelationKey::new(&record.source, &record.relation, &record.target);
            let label = key.to_string();
            if record.relation_key != label {
                warn!(
                    stored = %record.relation_key,
                    computed = %label,
                    "relationship key recomputed"
                );
                stale_labels.push((record.relation_key, key.clone()));
            }
            keys_by_label.insert(label, key.clone());
            graph.relationships.insert(
                key,
                Relationship {
                    source: record.source,
                    target: record.target,
                    relation: record.relation,
                    chunk_id: record.chunk_id,
                },
            );
        }

        for (label, key) in stale_labels {
            keys_by_label.entry(label).or_insert(key);
        }

        for record in snapshot.entities {
            if graph.entities.contains_key(&record.entity) {
                warn!(entity = %record.entity, "duplicate entity in snapshot ignored");
                continue;
            }

            let mut connected_chunks = BTreeSet::new();
            for chunk_id in record.connected_chunks {
                match graph.chunks.get_mut(&chunk_id) {
                    Some(chunk) => {
                        chunk.entities.insert(record.entity.clone());
                        connected_chunks.insert(chunk_id);
                    }
                    None => {
                        warn!(
                            entity = %record.entity,
                            chunk_id = %chunk_id,
                            "dropping link to unknown chunk"
                        )
                    }
                }
            }

            let relationships = record
                .relationships
                .iter()
                .filter_map(|label| match keys_by_label.get(label) {
                    Some(key) => Some(key.clone()),
                    None => {
                        warn!(
                            entity = %record.entity,
                            key = %label,
                            "dropping unknown relationship"
                        );
                        None
                    }
                })
                .collect();

            graph.entities.insert(
                record.entity.clone(),
                EntityNode {
                    name: record.entity,
                    entity_type: record.entity_type,
                    metadata: record.metadata,
                    connected_chunks,
                    relationships,
                },
            );
        }

        graph
    }

    /// Write the graph as pretty JSON, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(&self.export())?;
        fs::write(path, json).await?;

        info!(path = %path.display(), stats = ?self.stats(), "graph snapshot saved");
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = fs::read_to_string(path).await?;
        let snapshot: GraphSnapshot = serde_json::from_str(&content)?;
        let graph = Self::from_snapshot(snapshot);

        info!(path = %path.display(), stats = ?graph.stats(), "graph snapshot loaded");
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        graph.add_chunk(0, "Paris is the capital of France.");
        graph.add_chunk(1, "France borders Germany.");
        graph.add_chunk("appendix", "Population figures.");
        graph.set_chunk_embedding(&ChunkId::from(0), vec![0.1, 0.2, 0.3]);

        let mut metadata = Metadata::new();
        metadata.insert("population".to_string(), serde_json::json!(2_100_000));
        graph.add_entity("Paris", "LOCATION", metadata);
        graph.add_entity("France", "LOCATION", Metadata::new());
        graph.connect_entity_to_chunk("Paris", &ChunkId::from(0));
        graph.connect_entity_to_chunk("France", &ChunkId::from(0));
        graph.connect_entity_to_chunk("France", &ChunkId::from(1));

        graph.add_relationship("Paris", "CAPITAL_OF", "France", 0);
        graph.add_relationship("France", "BORDERS", "Germany", 1);
        graph
    }

    fn triples(graph: &KnowledgeGraph) -> BTreeSet<(String, String, String, ChunkId)> {
        graph
            .relationships()
            .map(|r| (r.source.clone(), r.relation.clone(), r.target.clone(), r.chunk_id.clone()))
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let graph = sample_graph();
        let json = serde_json::to_string(&graph.export()).unwrap();
        let restored = KnowledgeGraph::from_snapshot(serde_json::from_str(&json).unwrap());

        let names =
            |g: &KnowledgeGraph| g.entities().map(|e| e.name.clone()).collect::<BTreeSet<_>>();
        assert_eq!(names(&restored), names(&graph));
        assert_eq!(triples(&restored), triples(&graph));

        for chunk in graph.chunks() {
            let other = restored.chunk(&chunk.id).unwrap();
            assert_eq!(other, chunk);
        }
        for entity in graph.entities() {
            assert_eq!(restored.entity(&entity.name).unwrap(), entity);
        }
        assert_eq!(restored.entity_relationships("France").len(), 2);
    }

    #[test]
    fn test_round_trip_with_separator_in_names() {
        let mut graph = KnowledgeGraph::new();
        graph.add_chunk(0, "pipes everywhere");
        for name in ["A|B", "A", "C"] {
            graph.add_entity(name, "T", Metadata::new());
        }
        graph.add_relationship("A|B", "R", "C", 0);
        graph.add_relationship("A", "B|R", "C", 0);

        let json = serde_json::to_string(&graph.export()).unwrap();
        let restored = KnowledgeGraph::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(triples(&restored), triples(&graph));
        for name in ["A|B", "A", "C"] {
            let mut expected = graph.entity_relationships(name);
            let mut actual = restored.entity_relationships(name);
            expected.sort_by_key(|r| r.key());
            actual.sort_by_key(|r| r.key());
            assert_eq!(actual, expected, "relationships of {name}");
        }

        let a = restored.entity_relationships("A");
        assert_eq!(a.len(), 1);
        assert_eq!((a[0].source.as_str(), a[0].relation.as_str()), ("A", "B|R"));
    }

    #[test]
    fn test_wire_format() {
        let value = serde_json::to_value(sample_graph().export()).unwrap();

        let paris = &value["entities"][1];
        assert_eq!(paris["entity"], "Paris");
        assert_eq!(paris["type"], "LOCATION");
        assert_eq!(paris["connectedChunks"], serde_json::json!([0]));
        assert_eq!(paris["relationships"], serde_json::json!(["Paris|CAPITAL_OF|France"]));

        assert_eq!(value["chunks"][2]["chunkId"], "appendix");
        assert_eq!(value["relationships"][0]["relationKey"], "France|BORDERS|Germany");
        assert_eq!(value["relationships"][0]["type"], "BORDERS");
    }

    #[test]
    fn test_import_deduplicates_and_drops_dangling() {
        let json = r#"{
            "entities": [
                {"entity": "A", "type": "T", "connectedChunks": [0, 0, 7], "relationships": ["A|R|B", "A|R|B", "missing"]}
            ],
            "chunks": [{"chunkId": 0, "text": "a"}],
            "relationships": [{"relationKey": "A|R|B", "source": "A", "target": "B", "type": "R", "chunkId": 0}]
        }"#;

        let graph = KnowledgeGraph::from_snapshot(serde_json::from_str(json).unwrap());
        let entity = graph.entity("A").unwrap();

        assert_eq!(entity.connected_chunks.len(), 1);
        assert_eq!(entity.relationships.len(), 1);
        assert!(graph.chunk_entities(&ChunkId::from(0)).contains("A"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.json");
        let graph = sample_graph();

        graph.save(&path).await.unwrap();
        let loaded = KnowledgeGraph::load(&path).await.unwrap();

        assert_eq!(loaded.stats(), graph.stats());
        assert_eq!(triples(&loaded), triples(&graph));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = KnowledgeGraph::load(&dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(SnapshotError::Io(_))));
    }
}
