use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Extraction provider error: {0}")]
    Provider(String),

    #[error("Extraction returned invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Failed to get valid JSON after {0} retries")]
    Exhausted(usize),
}

impl From<reqwest::Error> for ExtractionError {
    fn from(err: reqwest::Error) -> Self {
        ExtractionError::Provider(err.to_string())
    }
}

impl From<serde_json::Error> for ExtractionError {
    fn from(err: serde_json::Error) -> Self {
        ExtractionError::InvalidJson(err.to_string())
    }
}
