//! OpenAI chat-completions provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{LanguageModel, LlmError, LlmMessage, LlmResponse, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: usize,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        temperature: Option<f64>,
        max_tokens: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey("openai"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "openai",
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
impl LanguageModel for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut wire_messages: Vec<serde_json::Value> = Vec::new();
        if let Some(system) = system_prompt {
            wire_messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for message in messages {
            wire_messages.push(serde_json::json!({
                "role": message.role.as_str(),
                "content": message.content,
            }));
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        debug!(model = %self.model, messages = wire_messages.len(), "Sending OpenAI request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "openai",
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                provider: "openai",
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| LlmError::RequestFailed {
                provider: "openai",
                message: e.to_string(),
            })?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let usage = json.get("usage").map(|usage| TokenUsage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as usize,
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as usize,
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
        let result = OpenAiProvider::new(
            String::new(),
            None,
            None,
            None,
            Duration::from_secs(60),
        );
        assert!(matches!(result, Err(LlmError::MissingApiKey("openai"))));
    }

    #[test]
    fn defaults_are_applied() {
        let provider = OpenAiProvider::new(
            "sk-test".to_string(),
            None,
            None,
            None,
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert_eq!(provider.temperature, 0.7);
    }
}
