//! The text-generation boundary used by every agent component.

use async_trait::async_trait;
use thiserror::Error;

/// Generation service errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Max retries exceeded after {0} attempts: {1}")]
    MaxRetriesExceeded(u32, String),
    #[error("Generation service unavailable: {0}")]
    Unavailable(String),
}

/// Produces text for a prompt and an optional system instruction.
///
/// Implementations may be backed by a local or remote language model. A
/// failure is reported once; the agent loop never retries the call itself.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, system_instruction: &str) -> Result<String, ModelError>;
}
