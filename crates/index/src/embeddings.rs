use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;

/// Converts text into a fixed-length vector.
///
/// Vectors returned within one session must share a dimensionality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        (**self).embed(text).await
    }
}

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "nomic-embed-text".to_string(),
        )
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url,
            model,
            client,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty text".to_string()));
        }

        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::Quota);
        }
        if status.is_client_error() {
            return Err(ProviderError::InvalidInput(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(ProviderError::Status { status: status.as_u16() });
        }

        let embedding_response: EmbeddingResponse = response.json().await?;

        if embedding_response.embedding.is_empty() {
            return Err(ProviderError::Decode("empty embedding".to_string()));
        }

        Ok(embedding_response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_text_rejected_without_request() {
        let client = EmbeddingClient::new("http://127.0.0.1:9".to_string(), "none".to_string());
        assert!(matches!(
            client.embed("  ").await,
            Err(ProviderError::InvalidInput(_))
        ));
    }
}
