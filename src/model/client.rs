//! Model client for text generation over HTTP.
//!
//! Two provider shapes are supported: OpenAI-compatible chat completions and
//! the Ollama-style local `/api/generate` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

use super::generator::{Generator, ModelError};

/// Default number of retry attempts for failed requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between retry attempts in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Which wire format the endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    /// `POST {base_url}/chat/completions`.
    OpenAiCompatible,
    /// `POST {base_url}/api/generate` with `stream: false`.
    Ollama,
}

impl ModelProvider {
    /// Parse a provider name as used in settings and environment variables.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" | "openai_compatible" | "openai-compatible" | "lmstudio" => {
                Some(Self::OpenAiCompatible)
            }
            "ollama" | "local" => Some(Self::Ollama),
            _ => None,
        }
    }
}

/// Configuration for the generation endpoint.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub extra_body: HashMap<String, Value>,
    /// Maximum number of retry attempts for failed requests.
    pub max_retries: u32,
    /// Delay between retry attempts in seconds.
    pub retry_delay_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "llama3.2".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            extra_body: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

impl ModelConfig {
    /// Set the provider kind.
    pub fn with_provider(mut self, provider: ModelProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Set the endpoint base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set the model name.
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Set the maximum number of retry attempts for failed requests.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between retry attempts in seconds.
    pub fn with_retry_delay(mut self, delay_secs: u64) -> Self {
        self.retry_delay_secs = delay_secs;
        self
    }
}

/// OpenAI API response structures.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

/// Ollama `/api/generate` response. Some compatible servers answer with
/// `content` instead of `response`.
#[derive(Debug, Deserialize)]
struct LocalGenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl LocalGenerateResponse {
    fn into_text(self) -> Result<String, ModelError> {
        self.response
            .or(self.content)
            .ok_or_else(|| ModelError::ParseError("No response text".to_string()))
    }
}

/// HTTP-backed [`Generator`].
pub struct ModelClient {
    config: ModelConfig,
    client: Client,
}

impl ModelClient {
    /// Create a new ModelClient with the given configuration.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create a new ModelClient with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ModelConfig::default())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Send a prompt, retrying transient failures.
    pub async fn request(&self, prompt: &str, system_instruction: &str) -> Result<String, ModelError> {
        let (url, body) = self.build_request(prompt, system_instruction);

        let mut last_error: Option<ModelError> = None;
        let max_attempts = self.config.max_retries + 1; // +1 for the initial attempt

        for attempt in 1..=max_attempts {
            match self.send_request(&url, &body).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    let is_retryable = Self::is_retryable_error(&e);

                    if attempt < max_attempts && is_retryable {
                        tracing::warn!(
                            attempt,
                            max_attempts,
                            delay_secs = self.config.retry_delay_secs,
                            "generation request failed, retrying: {}",
                            e
                        );
                        sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
                        last_error = Some(e);
                    } else if !is_retryable {
                        return Err(e);
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(ModelError::MaxRetriesExceeded(
            self.config.max_retries,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }

    fn build_request(&self, prompt: &str, system_instruction: &str) -> (String, Value) {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.provider {
            ModelProvider::OpenAiCompatible => {
                let mut messages = Vec::new();
                if !system_instruction.is_empty() {
                    messages.push(MessageBuilder::create_system_message(system_instruction));
                }
                messages.push(MessageBuilder::create_user_message(prompt));

                let mut body = json!({
                    "messages": messages,
                    "model": self.config.model_name,
                    "max_tokens": self.config.max_tokens,
                    "temperature": self.config.temperature,
                });
                self.merge_extra_body(&mut body);
                (format!("{}/chat/completions", base), body)
            }
            ModelProvider::Ollama => {
                let full_prompt = if system_instruction.is_empty() {
                    prompt.to_string()
                } else {
                    format!("{}\n\n{}", system_instruction, prompt)
                };
                let mut body = json!({
                    "model": self.config.model_name,
                    "prompt": full_prompt,
                    "stream": false,
                });
                self.merge_extra_body(&mut body);
                (format!("{}/api/generate", base), body)
            }
        }
    }

    fn merge_extra_body(&self, body: &mut Value) {
        if let Value::Object(ref mut map) = body {
            for (key, value) in &self.config.extra_body {
                map.insert(key.clone(), value.clone());
            }
        }
    }

    /// Network failures, 5xx gateway errors and 429s are retried. API errors
    /// carry the status code as their `"{code}: "` prefix.
    fn is_retryable_error(error: &ModelError) -> bool {
        match error {
            ModelError::RequestFailed(_) => true,
            ModelError::ApiError(msg) => {
                let status = msg
                    .split_once(':')
                    .and_then(|(code, _)| code.trim().parse::<u16>().ok());
                match status {
                    Some(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
                    None => {
                        let lower = msg.to_lowercase();
                        lower.contains("timeout") || lower.contains("rate limit")
                    }
                }
            }
            ModelError::ParseError(_) => false,
            ModelError::MaxRetriesExceeded(_, _) => false,
            ModelError::Unavailable(_) => false,
        }
    }

    /// Send a single request to the API.
    async fn send_request(&self, url: &str, body: &Value) -> Result<String, ModelError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError(format!("{}: {}", status.as_u16(), error_text)));
        }

        match self.config.provider {
            ModelProvider::OpenAiCompatible => {
                let completion: ChatCompletionResponse = response.json().await?;
                completion
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| ModelError::ParseError("No choices in response".to_string()))
            }
            ModelProvider::Ollama => {
                let data: LocalGenerateResponse = response.json().await?;
                data.into_text()
            }
        }
    }
}

#[async_trait]
impl Generator for ModelClient {
    async fn generate(&self, prompt: &str, system_instruction: &str) -> Result<String, ModelError> {
        self.request(prompt, system_instruction).await
    }
}

/// Helper for building chat messages.
pub struct MessageBuilder;

impl MessageBuilder {
    /// Create a system message.
    pub fn create_system_message(content: &str) -> Value {
        json!({
            "role": "system",
            "content": content
        })
    }

    /// Create a plain-text user message.
    pub fn create_user_message(text: &str) -> Value {
        json!({
            "role": "user",
            "content": text
        })
    }
}
