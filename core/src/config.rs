//! Configuration Management Module
//!
//! Runtime settings loaded from environment variables, with validation of
//! the numeric ranges the agent pipeline depends on.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Language-model provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    OpenAi,
    Anthropic,
    Auto,
}

impl std::str::FromStr for ProviderChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderChoice::OpenAi),
            "anthropic" => Ok(ProviderChoice::Anthropic),
            "auto" => Ok(ProviderChoice::Auto),
            other => Err(anyhow!("Unsupported LLM_PROVIDER value: {}", other)),
        }
    }
}

/// Application settings, one instance per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,

    // Server
    pub host: String,
    pub port: u16,
    pub secret_key: String,

    // LLM providers
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub llm_provider: ProviderChoice,
    pub llm_model: Option<String>,
    pub llm_temperature: Option<f64>,
    pub llm_max_tokens: Option<usize>,

    // Memory services
    pub redis_url: String,
    pub qdrant_url: String,
    pub database_url: String,

    // Agent behaviour
    pub agent_max_retries: u32,
    pub agent_timeout_seconds: f64,

    // Logging
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "127.0.0.1".to_string(),
            port: 8741,
            secret_key: "dev-secret-key-change-in-production".to_string(),
            openai_api_key: None,
            anthropic_api_key: None,
            llm_provider: ProviderChoice::Auto,
            llm_model: None,
            llm_temperature: None,
            llm_max_tokens: None,
            redis_url: "redis://localhost:6379".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            database_url: "postgresql://localhost:5432/slovo".to_string(),
            agent_max_retries: 2,
            agent_timeout_seconds: 60.0,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(host) = env_var("AGENT_HOST") {
            settings.host = host;
        }
        if let Some(port) = env_var("AGENT_PORT") {
            settings.port = port
                .parse()
                .map_err(|e| anyhow!("Invalid AGENT_PORT '{}': {}", port, e))?;
        }
        if let Some(key) = env_var("AGENT_SECRET_KEY") {
            settings.secret_key = key;
        } else if let Some(key) = env_var("SLOVO_ENCRYPTION_KEY") {
            // Fallback passphrase when no explicit secret key is set.
            settings.secret_key = key;
        }

        settings.openai_api_key = env_var("OPENAI_API_KEY");
        settings.anthropic_api_key = env_var("ANTHROPIC_API_KEY");

        if let Some(provider) = env_var("LLM_PROVIDER") {
            settings.llm_provider = provider.parse()?;
        }
        settings.llm_model = env_var("LLM_MODEL");

        if let Some(temp) = env_var("LLM_TEMPERATURE") {
            let value: f64 = temp
                .parse()
                .map_err(|e| anyhow!("Invalid LLM_TEMPERATURE '{}': {}", temp, e))?;
            if !(0.0..=2.0).contains(&value) {
                return Err(anyhow!(
                    "LLM_TEMPERATURE must be within [0.0, 2.0], got {}",
                    value
                ));
            }
            settings.llm_temperature = Some(value);
        }
        if let Some(max) = env_var("LLM_MAX_TOKENS") {
            let value: usize = max
                .parse()
                .map_err(|e| anyhow!("Invalid LLM_MAX_TOKENS '{}': {}", max, e))?;
            if value == 0 {
                return Err(anyhow!("LLM_MAX_TOKENS must be at least 1"));
            }
            settings.llm_max_tokens = Some(value);
        }

        if let Some(url) = env_var("REDIS_URL") {
            settings.redis_url = url;
        }
        if let Some(url) = env_var("QDRANT_URL") {
            settings.qdrant_url = url;
        }
        if let Some(url) = env_var("DATABASE_URL") {
            settings.database_url = url;
        }

        if let Some(retries) = env_var("AGENT_MAX_RETRIES") {
            let value: u32 = retries
                .parse()
                .map_err(|e| anyhow!("Invalid AGENT_MAX_RETRIES '{}': {}", retries, e))?;
            if value > 5 {
                return Err(anyhow!(
                    "AGENT_MAX_RETRIES must be within [0, 5], got {}",
                    value
                ));
            }
            settings.agent_max_retries = value;
        }
        if let Some(timeout) = env_var("AGENT_TIMEOUT") {
            let value: f64 = timeout
                .parse()
                .map_err(|e| anyhow!("Invalid AGENT_TIMEOUT '{}': {}", timeout, e))?;
            if value < 1.0 {
                return Err(anyhow!("AGENT_TIMEOUT must be at least 1 second"));
            }
            settings.agent_timeout_seconds = value;
        }

        if let Some(level) = env_var("LOG_LEVEL") {
            settings.log_level = level;
        }

        Ok(settings)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_single_user_setup() {
        let settings = Settings::default();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 8741);
        assert_eq!(settings.llm_provider, ProviderChoice::Auto);
        assert_eq!(settings.agent_max_retries, 2);
        assert_eq!(settings.redis_url, "redis://localhost:6379");
        assert_eq!(settings.agent_timeout_seconds, 60.0);
    }

    #[test]
    fn provider_choice_parses_known_values() {
        assert_eq!(
            "openai".parse::<ProviderChoice>().unwrap(),
            ProviderChoice::OpenAi
        );
        assert_eq!(
            "Anthropic".parse::<ProviderChoice>().unwrap(),
            ProviderChoice::Anthropic
        );
        assert!("ollama".parse::<ProviderChoice>().is_err());
    }
}
