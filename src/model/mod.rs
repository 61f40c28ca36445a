//! Generation service boundary and HTTP client.

mod client;
mod extract;
mod generator;

pub use client::{
    MessageBuilder, ModelClient, ModelConfig, ModelProvider, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_SECS,
};
pub use extract::{extract_json_array, extract_json_object};
pub use generator::{Generator, ModelError};
