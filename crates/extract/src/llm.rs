use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::prompt;

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
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
            "llama3".to_string(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ExtractionError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
        };

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExtractionError::Provider(format!(
                "Ollama request failed: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaResponse = response.json().await?;

        Ok(ollama_response.response)
    }

    /// Generate with retry for invalid JSON
    pub async fn generate_json_with_retry(
        &self,
        prompt: &str,
        max_retries: usize,
    ) -> Result<String, ExtractionError> {
        let attempts = max_retries.max(1);

        for attempt in 0..attempts {
            let response = self.generate(prompt).await?;

            if serde_json::from_str::<serde_json::Value>(&response).is_ok() {
                return Ok(response);
            }

            debug!(attempt, "extraction response was not valid JSON");

            // Ask the model to repair its own output before re-prompting
            if attempt + 1 < attempts {
                let corrected = self.generate(&prompt::build_retry_prompt(&response)).await?;
                if serde_json::from_str::<serde_json::Value>(&corrected).is_ok() {
                    return Ok(corrected);
                }
            }
        }

        warn!(model = %self.model, attempts, "giving up on extraction JSON");
        Err(ExtractionError::Exhausted(attempts))
    }
}
