use thiserror::Error;

/// Failures reported by an embedding provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding provider returned status {status}")]
    Status { status: u16 },

    #[error("Embedding provider quota exceeded")]
    Quota,

    #[error("Embedding request timed out")]
    Timeout,

    #[error("Invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("Failed to decode embedding response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Request(_) | ProviderError::Quota | ProviderError::Timeout => true,
            ProviderError::Status { status } => *status >= 500,
            ProviderError::InvalidInput(_) | ProviderError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
