//! Intent interpreter agent.
//!
//! Classifies the utterance, detects its language, extracts entities and
//! decides whether a tool is needed. The model path returns a structured
//! analysis; without a model a heuristic classification runs instead.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use slovo_core::llm::{generate_structured, LanguageModel, LlmMessage};
use slovo_core::models::{Intent, IntentType};

const INTENT_SYSTEM_PROMPT: &str = "You are an intent interpretation system for a voice assistant called Slovo.
Your job is to analyze user messages and extract structured information about their intent.

You must:
1. Identify the primary intent (what the user wants to accomplish)
2. Classify the intent type (question, command, conversation, tool_request, clarification)
3. Detect the primary language used
4. Extract relevant entities (dates, locations, names, numbers, etc.)
5. Determine if a tool or external capability is needed
6. Assess your confidence level honestly";

const INTENT_SCHEMA: &str = r#"{
  "intent_type": "question | command | conversation | tool_request | clarification | unknown",
  "language": "ISO language code",
  "entities": [{"type": "string", "value": "string"}],
  "confidence": 0.0,
  "requires_tool": false,
  "suggested_tools": ["string"]
}"#;

/// Words that open a question in the heuristic path.
const INTERROGATIVES: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "can you", "could you",
];

/// Leading phrases that read as a command.
const IMPERATIVES: &[&str] = &[
    "please", "can you", "could you", "i need", "i want", "help me",
];

/// Keywords that signal an external capability is wanted.
const TOOL_LEXICON: &[&str] = &[
    "search", "find", "look up", "calculate", "convert", "translate",
];

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    #[serde(rename = "type")]
    entity_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct IntentAnalysis {
    intent_type: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    confidence: f64,
    #[serde(default)]
    requires_tool: bool,
    #[serde(default)]
    suggested_tools: Vec<String>,
}

pub struct IntentAgent {
    llm: Option<Arc<dyn LanguageModel>>,
}

impl IntentAgent {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>) -> Self {
        info!(has_llm = llm.is_some(), "Intent agent initialized");
        Self { llm }
    }

    /// Interpret an utterance, optionally with conversation context.
    pub async fn interpret(&self, message: &str, conversation_context: Option<&str>) -> Intent {
        debug!(message_length = message.len(), "Interpreting message");

        if let Some(llm) = &self.llm {
            match self.llm_interpret(llm.as_ref(), message, conversation_context).await {
                Ok(intent) => return intent,
                Err(e) => warn!("Model interpretation failed, using heuristics: {e}"),
            }
        }

        heuristic_interpret(message)
    }

    async fn llm_interpret(
        &self,
        llm: &dyn LanguageModel,
        message: &str,
        conversation_context: Option<&str>,
    ) -> Result<Intent, slovo_core::llm::LlmError> {
        let mut user_content = format!("Analyze this user message:\n\n\"{message}\"");
        if let Some(context) = conversation_context {
            user_content = format!("Conversation context:\n{context}\n\n{user_content}");
        }
        let messages = vec![LlmMessage::user(user_content)];

        let analysis: IntentAnalysis =
            generate_structured(llm, &messages, INTENT_SYSTEM_PROMPT, INTENT_SCHEMA).await?;

        let intent_type = match analysis.intent_type.to_lowercase().as_str() {
            "question" => IntentType::Question,
            "command" => IntentType::Command,
            "conversation" => IntentType::Conversation,
            "tool_request" => IntentType::ToolRequest,
            "clarification" => IntentType::Clarification,
            _ => IntentType::Unknown,
        };

        let entities: HashMap<String, String> = analysis
            .entities
            .into_iter()
            .map(|e| (e.entity_type, e.value))
            .collect();

        let mut intent = Intent::new(intent_type, message);
        intent.language = analysis.language.unwrap_or_else(|| "en".to_string());
        intent.entities = entities;
        intent.confidence = analysis.confidence.clamp(0.0, 1.0);
        intent.requires_tool = analysis.requires_tool;
        intent.tool_hint = analysis.suggested_tools.into_iter().next();

        debug!(
            intent_type = intent.intent_type.as_str(),
            confidence = intent.confidence,
            "Intent analysis complete"
        );
        Ok(intent)
    }
}

/// Heuristic classification without a model.
fn heuristic_interpret(message: &str) -> Intent {
    debug!("Using heuristic interpretation (no LLM)");

    let lower = message.to_lowercase().trim().to_string();

    if lower.is_empty() {
        let mut intent = Intent::new(IntentType::Unknown, message);
        intent.confidence = 0.0;
        return intent;
    }

    let intent_type = if lower.ends_with('?')
        || INTERROGATIVES.iter().any(|q| lower.starts_with(q))
    {
        IntentType::Question
    } else if IMPERATIVES.iter().any(|c| lower.starts_with(c)) {
        IntentType::Command
    } else {
        IntentType::Conversation
    };

    let requires_tool = TOOL_LEXICON.iter().any(|keyword| lower.contains(keyword));

    let mut intent = Intent::new(intent_type, message);
    intent.confidence = 0.6;
    intent.requires_tool = requires_tool;
    intent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn greeting_classifies_as_conversation() {
        let agent = IntentAgent::new(None);
        let intent = agent.interpret("Hello", None).await;
        assert_eq!(intent.intent_type, IntentType::Conversation);
        assert!(!intent.requires_tool);
    }

    #[tokio::test]
    async fn trailing_question_mark_means_question() {
        let agent = IntentAgent::new(None);
        let intent = agent.interpret("Is it raining today?", None).await;
        assert_eq!(intent.intent_type, IntentType::Question);
    }

    #[tokio::test]
    async fn interrogative_prefix_means_question() {
        let agent = IntentAgent::new(None);
        let intent = agent.interpret("what time is it", None).await;
        assert_eq!(intent.intent_type, IntentType::Question);
    }

    #[tokio::test]
    async fn imperative_prefix_means_command() {
        let agent = IntentAgent::new(None);
        let intent = agent.interpret("please turn on the lights", None).await;
        assert_eq!(intent.intent_type, IntentType::Command);
    }

    #[tokio::test]
    async fn tool_lexicon_sets_requires_tool() {
        let agent = IntentAgent::new(None);
        let intent = agent.interpret("search for rust tutorials", None).await;
        assert!(intent.requires_tool);

        let intent = agent.interpret("convert 10 miles to km", None).await;
        assert!(intent.requires_tool);
    }

    #[tokio::test]
    async fn empty_utterance_is_unknown() {
        let agent = IntentAgent::new(None);
        let intent = agent.interpret("", None).await;
        assert_eq!(intent.intent_type, IntentType::Unknown);
        assert_eq!(intent.confidence, 0.0);

        let intent = agent.interpret("   ", None).await;
        assert_eq!(intent.intent_type, IntentType::Unknown);
    }
}
