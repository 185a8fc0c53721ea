use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{send_json, LlmError, OutputSchema, StructuredGenerator};
use crate::config::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Claude over the messages API. Structured output is obtained by forcing a
/// single tool call whose input schema is the requested schema.
pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl AnthropicGenerator {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| LlmError::Provider {
                provider: "anthropic".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

pub(crate) fn factory(
    config: &LlmConfig,
    api_key: String,
) -> Result<Arc<dyn StructuredGenerator>, LlmError> {
    Ok(Arc::new(AnthropicGenerator::new(config, api_key)?))
}

#[async_trait]
impl StructuredGenerator for AnthropicGenerator {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, LlmError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "tools": [{
                "name": schema.name,
                "description": schema.description,
                "input_schema": schema.schema,
            }],
            "tool_choice": { "type": "tool", "name": schema.name },
            "messages": [{ "role": "user", "content": prompt }],
        });

        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let response = send_json("anthropic", request).await?;

        response["content"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|block| block["type"] == "tool_use")
            .map(|block| block["input"].clone())
            .ok_or_else(|| LlmError::InvalidOutput("response carried no tool_use block".to_string()))
    }
}
