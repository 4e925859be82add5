//! Anthropic messages provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{LanguageModel, LlmError, LlmMessage, LlmResponse, MessageRole, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: usize,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        temperature: Option<f64>,
        max_tokens: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey("anthropic"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "anthropic",
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: temperature.unwrap_or(0.7),
            max_tokens: max_tokens.unwrap_or(1024),
        })
    }

}

#[async_trait]
impl LanguageModel for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);

        // Anthropic takes the system prompt as a top-level field; system
        // messages inside the list are folded into it.
        let mut system = system_prompt.unwrap_or("").to_string();
        let mut wire_messages: Vec<serde_json::Value> = Vec::new();
        for message in messages {
            match message.role {
                MessageRole::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&message.content);
                }
                MessageRole::User | MessageRole::Assistant => {
                    wire_messages.push(serde_json::json!({
                        "role": message.role.as_str(),
                        "content": message.content,
                    }));
                }
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": wire_messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system);
        }

        debug!(model = %self.model, messages = wire_messages.len(), "Sending Anthropic request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "anthropic",
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                provider: "anthropic",
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| LlmError::RequestFailed {
                provider: "anthropic",
                message: e.to_string(),
            })?;

        let content = json["content"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let usage = json.get("usage").map(|usage| {
            let prompt = usage["input_tokens"].as_u64().unwrap_or(0) as usize;
            let completion = usage["output_tokens"].as_u64().unwrap_or(0) as usize;
            TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        Ok(LlmResponse {
            content,
            model: self.model.clone(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        let result = AnthropicProvider::new(
            String::new(),
            None,
            None,
            None,
            Duration::from_secs(60),
        );
        assert!(matches!(result, Err(LlmError::MissingApiKey("anthropic"))));
    }
}
