//! Language-model capability: one structured-generation call behind a trait,
//! with providers picked from a fixed registry.

pub mod anthropic;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use thiserror::Error;

pub use registry::{ModelPool, ProviderFactory, ProviderRegistry};

/// JSON schema the model output must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("unknown model provider '{provider}' (known: {known})")]
    UnknownProvider { provider: String, known: String },
    #[error("model provider API key {env} is not set")]
    MissingApiKey { env: String },
    #[error("model provider {provider} rejected the API key")]
    InvalidApiKey { provider: String },
    #[error("model provider rate limit exceeded")]
    RateLimited,
    #[error("model provider {provider} timed out")]
    Timeout { provider: String },
    #[error("model provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
    #[error("model output did not match the requested schema: {0}")]
    InvalidOutput(String),
}

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    /// Generate one JSON object conforming to `schema`.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, LlmError>;
}

/// Send a provider request and decode the JSON body, mapping failures the
/// same way for every provider.
pub(crate) async fn send_json(provider: &str, request: RequestBuilder) -> Result<Value, LlmError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            LlmError::Timeout {
                provider: provider.to_string(),
            }
        } else {
            LlmError::Provider {
                provider: provider.to_string(),
                message: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| LlmError::Provider {
            provider: provider.to_string(),
            message: format!("failed to parse response: {e}"),
        });
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::InvalidApiKey {
            provider: provider.to_string(),
        },
        _ => LlmError::Provider {
            provider: provider.to_string(),
            message,
        },
    })
}
