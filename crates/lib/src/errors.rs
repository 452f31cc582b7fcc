use thiserror::Error;

/// Errors produced by the outbound provider plumbing (LLM, embedding,
/// storage connections). Component-level pipelines wrap this in their own
/// error enums.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to build Reqwest client: {0}")]
    ReqwestClientBuild(reqwest::Error),
    #[error("Failed to send request to AI provider: {0}")]
    AiRequest(reqwest::Error),
    #[error("Failed to deserialize AI provider response: {0}")]
    AiDeserialization(reqwest::Error),
    #[error("AI provider returned an error: {0}")]
    AiApi(String),
    #[error("AI provider rate limited the request: {0}")]
    RateLimited(String),
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),
    #[error("Storage operation failed: {0}")]
    StorageOperationFailed(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("API key is missing")]
    MissingApiKey,
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether the caller should fail over to the secondary provider.
    ///
    /// Rate limiting, transport failures, and timeouts are failover-worthy;
    /// a malformed API key or a deserialization bug is not made better by
    /// asking a different vendor the same way.
    pub fn is_failover_worthy(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::AiRequest(_)
                | ProviderError::AiApi(_)
                | ProviderError::Timeout(_)
        )
    }
}
