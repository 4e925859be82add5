//! Explainer agent.
//!
//! Produces the user-facing response, an optional reasoning summary and a
//! confidence note when the verifier was not convinced.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use slovo_core::llm::{generate_structured, LanguageModel, LlmMessage};
use slovo_core::models::{ExecutionResult, Explanation, Intent, Verification};

const EXPLAINER_SYSTEM_PROMPT: &str = "You are an explanation system for a voice assistant called Slovo.
Your job is to generate clear, helpful responses and explain the assistant's reasoning when needed.

Guidelines:
1. The response should be the primary content the user sees
2. Keep responses conversational and natural
3. If confidence is low, include appropriate caveats
4. If something failed or was uncertain, be honest about it";

const RESPONSE_SCHEMA: &str = r#"{
  "response": "string",
  "summary": "string",
  "confidence_statement": "string or null",
  "caveats": ["string"]
}"#;

#[derive(Debug, Deserialize)]
struct ResponseGeneration {
    response: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    confidence_statement: Option<String>,
    #[serde(default)]
    caveats: Vec<String>,
}

pub struct ExplainerAgent {
    llm: Option<Arc<dyn LanguageModel>>,
}

impl ExplainerAgent {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>) -> Self {
        info!(has_llm = llm.is_some(), "Explainer agent initialized");
        Self { llm }
    }

    pub async fn explain(
        &self,
        intent: &Intent,
        result: &ExecutionResult,
        verification: &Verification,
    ) -> Explanation {
        debug!(success = result.success, "Generating explanation");

        if let Some(llm) = &self.llm {
            match self.llm_explain(llm.as_ref(), intent, result, verification).await {
                Ok(explanation) => return explanation,
                Err(e) => warn!("Model explanation failed, using heuristics: {e}"),
            }
        }

        heuristic_explain(intent, result, verification)
    }

    async fn llm_explain(
        &self,
        llm: &dyn LanguageModel,
        intent: &Intent,
        result: &ExecutionResult,
        verification: &Verification,
    ) -> Result<Explanation, slovo_core::llm::LlmError> {
        let user_content = if result.success {
            format!(
                "Generate an explanation for this completed request:\n\n\
                 Original request: \"{}\"\nIntent type: {}\n\n\
                 Response generated:\n{}\n\n\
                 Verification:\n- Valid: {}\n- Confidence: {:.2}\n- Issues: {}\n\n\
                 Generate a polished explanation with appropriate tone and any needed caveats.",
                intent.text,
                intent.intent_type.as_str(),
                result.final_text().unwrap_or_default(),
                verification.is_valid,
                verification.confidence,
                if verification.issues.is_empty() {
                    "None".to_string()
                } else {
                    verification.issues.join("; ")
                },
            )
        } else {
            format!(
                "The assistant failed to complete the user's request.\n\n\
                 Original request: \"{}\"\nError: {}\nIssues: {}\n\n\
                 Generate a helpful, friendly explanation of what went wrong and what the user can do.",
                intent.text,
                result.error.as_deref().unwrap_or("An unknown error occurred"),
                verification.issues.join("; "),
            )
        };
        let messages = vec![LlmMessage::user(user_content)];

        let generation: ResponseGeneration =
            generate_structured(llm, &messages, EXPLAINER_SYSTEM_PROMPT, RESPONSE_SCHEMA).await?;

        let mut confidence_note = generation.confidence_statement;
        if !generation.caveats.is_empty() {
            let caveats = generation.caveats.join("; ");
            confidence_note = Some(match confidence_note {
                Some(note) => format!("{note} Note: {caveats}"),
                None => format!("Note: {caveats}"),
            });
        }

        Ok(Explanation {
            response: generation.response,
            reasoning: if generation.summary.is_empty() {
                None
            } else {
                Some(generation.summary)
            },
            actions_taken: result
                .plan
                .steps
                .iter()
                .map(|step| step.description.clone())
                .collect(),
            confidence_note,
        })
    }
}

/// Deterministic explanation: the executor's output stands as the
/// response, reasoning concatenates intent type, step count and issues,
/// and low verifier confidence earns a caveat.
fn heuristic_explain(
    intent: &Intent,
    result: &ExecutionResult,
    verification: &Verification,
) -> Explanation {
    debug!("Using heuristic explanation (no LLM)");

    let response = match result.final_text() {
        Some(output) if result.success => output,
        _ => {
            let mut response =
                "I apologize, but I wasn't able to complete your request.".to_string();
            if let Some(error) = &result.error {
                response.push_str(&format!(" The issue was: {error}"));
            }
            response
        }
    };

    let mut reasoning_parts = vec![
        format!("Understood intent: {}", intent.intent_type.as_str()),
        format!("Executed {} steps", result.step_results.len()),
    ];
    if !verification.issues.is_empty() {
        reasoning_parts.push(format!("Issues found: {}", verification.issues.join(", ")));
    }

    let confidence_note = if verification.confidence < 0.7 {
        Some(
            "I'm not entirely confident in this response. Please verify the information."
                .to_string(),
        )
    } else {
        None
    };

    Explanation {
        response,
        reasoning: Some(reasoning_parts.join(" | ")),
        actions_taken: result
            .plan
            .steps
            .iter()
            .map(|step| step.description.clone())
            .collect(),
        confidence_note,
    }
}
