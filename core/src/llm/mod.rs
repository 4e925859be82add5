//! Language-model integration.
//!
//! Agents talk to models through the [`LanguageModel`] trait so the heavy
//! reasoning path can be swapped (or mocked) without touching agent logic.
//! Two providers are implemented over HTTP: OpenAI chat completions and
//! Anthropic messages. Structured outputs are requested by appending a
//! schema instruction to the prompt and parsing the JSON reply.

mod anthropic;
mod embeddings;
mod factory;
mod openai;

pub use anthropic::AnthropicProvider;
pub use embeddings::{EmbeddingProvider, OpenAiEmbedder, EMBEDDING_DIMENSION};
pub use factory::{build_embedding_provider, build_language_model};
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key configured for provider {0}")]
    MissingApiKey(&'static str),
    #[error("request to {provider} failed: {message}")]
    RequestFailed {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} API error ({status}): {message}")]
    ApiError {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("failed to parse structured output: {0}")]
    StructuredParse(String),
}

/// Message role in a model conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One message in a model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Completed model reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Seam between the agents and the model providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider label for logging.
    fn name(&self) -> &'static str;

    /// Generate a completion for the given conversation.
    async fn generate(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
    ) -> Result<LlmResponse, LlmError>;
}

/// Ask the model for JSON conforming to `schema_description` and parse it.
///
/// The schema instruction rides on the system prompt; the reply may wrap
/// the JSON in a markdown fence, which is stripped before parsing.
pub async fn generate_structured<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    messages: &[LlmMessage],
    system_prompt: &str,
    schema_description: &str,
) -> Result<T, LlmError> {
    let system = format!(
        "{system_prompt}\n\nRespond with a single JSON object and nothing else. \
         The object must have this shape:\n{schema_description}"
    );

    let response = model.generate(messages, Some(&system)).await?;
    debug!(provider = model.name(), "Structured response received");

    let json = extract_json(&response.content).ok_or_else(|| {
        warn!(provider = model.name(), "No JSON object found in reply");
        LlmError::StructuredParse("no JSON object in model reply".to_string())
    })?;

    serde_json::from_str(json).map_err(|e| LlmError::StructuredParse(e.to_string()))
}

/// Locate the JSON object inside a model reply, tolerating markdown fences
/// and surrounding prose.
fn extract_json(content: &str) -> Option<&str> {
    let trimmed = content.trim();

    let body = if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(end) => after[..end].trim(),
            None => after.trim(),
        }
    } else {
        trimmed
    };

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&body[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        answer: String,
        score: f64,
    }

    struct CannedModel(String);

    #[async_trait]
    impl LanguageModel for CannedModel {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn generate(
            &self,
            _messages: &[LlmMessage],
            _system_prompt: Option<&str>,
        ) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: self.0.clone(),
                model: "canned".to_string(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn structured_parses_bare_json() {
        let model = CannedModel(r#"{"answer": "yes", "score": 0.9}"#.to_string());
        let parsed: Sample = generate_structured(&model, &[], "test", "{}").await.unwrap();
        assert_eq!(parsed.answer, "yes");
        assert_eq!(parsed.score, 0.9);
    }

    #[tokio::test]
    async fn structured_parses_fenced_json_with_prose() {
        let model = CannedModel(
            "Here you go:\n```json\n{\"answer\": \"no\", \"score\": 0.1}\n```\nDone."
                .to_string(),
        );
        let parsed: Sample = generate_structured(&model, &[], "test", "{}").await.unwrap();
        assert_eq!(parsed.answer, "no");
    }

    #[tokio::test]
    async fn structured_rejects_replies_without_json() {
        let model = CannedModel("I cannot answer that.".to_string());
        let result: Result<Sample, _> = generate_structured(&model, &[], "test", "{}").await;
        assert!(matches!(result, Err(LlmError::StructuredParse(_))));
    }

    #[test]
    fn extract_json_finds_object_in_prose() {
        assert_eq!(
            extract_json("sure: {\"a\": 1} thanks"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json("nothing here"), None);
    }
}
