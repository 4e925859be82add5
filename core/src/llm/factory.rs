//! Provider construction from settings.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ProviderChoice, Settings};

use super::{
    AnthropicProvider, EmbeddingProvider, LanguageModel, OpenAiEmbedder, OpenAiProvider,
};

/// Build the configured language model, if any key is available.
///
/// `auto` prefers Anthropic when both keys are configured. Returning `None`
/// puts every agent on its deterministic fallback path.
pub fn build_language_model(settings: &Settings) -> Option<Arc<dyn LanguageModel>> {
    let timeout = Duration::from_secs_f64(settings.agent_timeout_seconds);

    let choice = match settings.llm_provider {
        ProviderChoice::Auto => {
            if settings.anthropic_api_key.is_some() {
                ProviderChoice::Anthropic
            } else if settings.openai_api_key.is_some() {
                ProviderChoice::OpenAi
            } else {
                warn!("No LLM API key configured; agents will use heuristic fallbacks");
                return None;
            }
        }
        explicit => explicit,
    };

    match choice {
        ProviderChoice::Anthropic => {
            let key = settings.anthropic_api_key.clone()?;
            match AnthropicProvider::new(
                key,
                settings.llm_model.clone(),
                settings.llm_temperature,
                settings.llm_max_tokens,
                timeout,
            ) {
                Ok(provider) => {
                    info!("Using Anthropic language model provider");
                    Some(Arc::new(provider))
                }
                Err(e) => {
                    warn!("Failed to build Anthropic provider: {}", e);
                    None
                }
            }
        }
        ProviderChoice::OpenAi => {
            let key = settings.openai_api_key.clone()?;
            match OpenAiProvider::new(
                key,
                settings.llm_model.clone(),
                settings.llm_temperature,
                settings.llm_max_tokens,
                timeout,
            ) {
                Ok(provider) => {
                    info!("Using OpenAI language model provider");
                    Some(Arc::new(provider))
                }
                Err(e) => {
                    warn!("Failed to build OpenAI provider: {}", e);
                    None
                }
            }
        }
        ProviderChoice::Auto => unreachable!("auto resolved above"),
    }
}

/// Build the embedding provider. Semantic memory requires an OpenAI key;
/// without one, semantic writes are refused and semantic retrieval is
/// skipped.
pub fn build_embedding_provider(settings: &Settings) -> Option<Arc<dyn EmbeddingProvider>> {
    let key = settings.openai_api_key.clone()?;
    let timeout = Duration::from_secs_f64(settings.agent_timeout_seconds);
    match OpenAiEmbedder::new(key, timeout) {
        Ok(embedder) => Some(Arc::new(embedder)),
        Err(e) => {
            warn!("Failed to build embedding provider: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_keys_yields_no_model() {
        let settings = Settings::default();
        assert!(build_language_model(&settings).is_none());
        assert!(build_embedding_provider(&settings).is_none());
    }

    #[test]
    fn auto_prefers_anthropic_when_both_keys_present() {
        let settings = Settings {
            openai_api_key: Some("sk-openai".to_string()),
            anthropic_api_key: Some("sk-ant".to_string()),
            ..Settings::default()
        };
        let model = build_language_model(&settings).unwrap();
        assert_eq!(model.name(), "anthropic");
    }

    #[test]
    fn auto_falls_back_to_openai() {
        let settings = Settings {
            openai_api_key: Some("sk-openai".to_string()),
            ..Settings::default()
        };
        let model = build_language_model(&settings).unwrap();
        assert_eq!(model.name(), "openai");
    }
}
