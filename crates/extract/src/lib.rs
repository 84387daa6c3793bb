pub mod error;
pub mod schema;
pub mod normalizer;
pub mod llm;
pub mod prompt;

pub use error::ExtractionError;
pub use schema::{ExtractedEntity, ExtractedRelationship, ExtractionResult};
pub use normalizer::EntityNormalizer;
pub use llm::OllamaClient;

use async_trait::async_trait;
use std::sync::Arc;

/// Produces entities and relationships from raw text.
///
/// Implementations may either return an empty result on failure or return an
/// error; callers treat both as "no entities found" unless configured to
/// propagate.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractionError>;
}

#[async_trait]
impl<T: EntityExtractor + ?Sized> EntityExtractor for Arc<T> {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractionError> {
        (**self).extract(text).await
    }
}

/// Which prompt the extractor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Document chunks: entities and relationships
    Document,
    /// User questions: entities only
    Query,
}

pub struct LlmExtractor {
    llm_client: OllamaClient,
    normalizer: EntityNormalizer,
    mode: ExtractionMode,
    max_retries: usize,
}

impl LlmExtractor {
    pub fn new(llm_client: OllamaClient, mode: ExtractionMode) -> Self {
        Self {
            llm_client,
            normalizer: EntityNormalizer::new(),
            mode,
            max_retries: 3,
        }
    }

    pub fn default() -> Self {
        Self::new(OllamaClient::default(), ExtractionMode::Document)
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Parse a raw model response into a cleaned result
    pub fn parse_response(&self, json_str: &str) -> Result<ExtractionResult, ExtractionError> {
        let result: ExtractionResult = serde_json::from_str(json_str)?;
        Ok(self.normalizer.clean_result(result))
    }
}

#[async_trait]
impl EntityExtractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractionError> {
        if text.trim().is_empty() {
            return Ok(ExtractionResult::default());
        }

        let prompt = match self.mode {
            ExtractionMode::Document => prompt::build_extraction_prompt(text),
            ExtractionMode::Query => prompt::build_query_prompt(text),
        };

        let json_str = self
            .llm_client
            .generate_json_with_retry(&prompt, self.max_retries)
            .await?;

        let mut result = self.parse_response(&json_str)?;
        if self.mode == ExtractionMode::Query {
            result.relationships.clear();
        }

        tracing::debug!(
            entities = result.entities.len(),
            relationships = result.relationships.len(),
            "extraction complete"
        );

        Ok(result)
    }
}

/// Returns the same result for every input.
#[derive(Debug, Clone, Default)]
pub struct StaticExtractor {
    result: ExtractionResult,
}

impl StaticExtractor {
    pub fn new(result: ExtractionResult) -> Self {
        Self { result }
    }

    pub fn with_entities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ExtractionResult {
            entities: names
                .into_iter()
                .map(|name| ExtractedEntity::new(name, "UNKNOWN"))
                .collect(),
            relationships: Vec::new(),
        })
    }
}

#[async_trait]
impl EntityExtractor for StaticExtractor {
    async fn extract(&self, _text: &str) -> Result<ExtractionResult, ExtractionError> {
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_cleans_names() {
        let extractor = LlmExtractor::default();
        let json = r#"{
            "entities": [{"text": " Paris. ", "type": "LOCATION"}],
            "relationships": [{"source": "Paris", "relationship": "CAPITAL_OF", "target": "France!"}]
        }"#;

        let result = extractor.parse_response(json).unwrap();

        assert_eq!(result.entities[0].text, "Paris");
        assert_eq!(result.relationships[0].target, "France");
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        let extractor = LlmExtractor::default();
        assert!(matches!(
            extractor.parse_response("not json"),
            Err(ExtractionError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn test_static_extractor() {
        let extractor = Arc::new(StaticExtractor::with_entities(["France"]));
        let result = extractor.extract("anything").await.unwrap();
        assert_eq!(result.entity_names(), vec!["France".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_text_skips_model() {
        // No server is contacted for blank input
        let extractor = LlmExtractor::new(
            OllamaClient::new("http://127.0.0.1:9".to_string(), "none".to_string()),
            ExtractionMode::Query,
        );
        assert!(extractor.extract("   ").await.unwrap().is_empty());
    }
}
