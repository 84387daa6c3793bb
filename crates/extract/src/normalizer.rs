use regex::Regex;
use std::sync::LazyLock;

use crate::schema::ExtractionResult;

static EDGE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[\s.,!?;:'"`]+|[\s.,!?;:'"`]+$"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Cleans entity surface text coming back from a model.
///
/// Case is preserved: entity names are case-sensitive graph keys, and
/// case-insensitive matching happens at scoring time.
pub struct EntityNormalizer;

impl EntityNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Trim surrounding punctuation and collapse internal whitespace
    pub fn clean(&self, name: &str) -> String {
        let trimmed = EDGE_PUNCTUATION.replace_all(name, "");
        WHITESPACE.replace_all(&trimmed, " ").into_owned()
    }

    /// Clean every name in a result, dropping entities and relationships
    /// that end up blank.
    pub fn clean_result(&self, mut result: ExtractionResult) -> ExtractionResult {
        for entity in &mut result.entities {
            entity.text = self.clean(&entity.text);
        }
        result.entities.retain(|e| !e.text.is_empty());

        for relationship in &mut result.relationships {
            relationship.source = self.clean(&relationship.source);
            relationship.target = self.clean(&relationship.target);
            relationship.relationship = relationship.relationship.trim().to_string();
        }
        result.relationships.retain(|r| {
            !r.source.is_empty() && !r.target.is_empty() && !r.relationship.is_empty()
        });

        result
    }
}

impl Default for EntityNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExtractedEntity, ExtractedRelationship};

    #[test]
    fn test_normalization() {
        let normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.clean("GraphRAG"), "GraphRAG");
        assert_eq!(normalizer.clean("GraphRAG!"), "GraphRAG");
        assert_eq!(normalizer.clean("  New   York. "), "New York");
        assert_eq!(normalizer.clean("'Paris'"), "Paris");
    }

    #[test]
    fn test_blank_entries_dropped() {
        let normalizer = EntityNormalizer::new();
        let result = ExtractionResult {
            entities: vec![
                ExtractedEntity::new("France", "LOCATION"),
                ExtractedEntity::new(" ... ", "LOCATION"),
            ],
            relationships: vec![
                ExtractedRelationship::new("Paris", "CAPITAL_OF", "France."),
                ExtractedRelationship::new("Paris", "CAPITAL_OF", "  "),
            ],
        };

        let cleaned = normalizer.clean_result(result);

        assert_eq!(cleaned.entities.len(), 1);
        assert_eq!(cleaned.relationships.len(), 1);
        assert_eq!(cleaned.relationships[0].target, "France");
    }
}
