//! Orchestrator: stage sequencing for the agent pipeline.
//!
//! One `process_message` call runs intent interpretation concurrently
//! with memory pre-retrieval, then either takes the conversational fast
//! path (a single response step, no verification or explanation) or the
//! full plan-execute-verify-explain pipeline with correction retries and
//! clarification suspension. Per-conversation state lives in two maps
//! owned by this struct; the caller serialises requests per conversation
//! id, so the maps see one writer per conversation at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use slovo_core::llm::LanguageModel;
use slovo_core::models::{
    AgentResult, ExecutionPlan, Intent, IntentType, MemoryContext, MemorySource, PlanStep,
    StepType, TurnRole, Verification, VerifierApproval, WriteRequest,
};
use slovo_memory::MemoryManager;
use slovo_tools::{DockerSandbox, ToolDiscoveryAgent, ToolRepository};

use crate::executor::ExecutorAgent;
use crate::explainer::ExplainerAgent;
use crate::intent::IntentAgent;
use crate::planner::PlannerAgent;
use crate::verifier::VerifierAgent;

const APOLOGY_RESPONSE: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

const CLARIFICATION_QUESTION: &str =
    "I want to make sure I understand. Could you tell me more about what you'd like me to do?";

/// Token budget for the pre-execution memory retrieval.
const PRE_RETRIEVAL_TOKEN_LIMIT: usize = 2000;

/// Small-talk phrases that let a question skip the full pipeline.
const SMALLTALK_LEXICON: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "goodbye",
    "bye",
    "see you",
    "thanks",
    "thank you",
    "how are you",
];

/// Utterance openings worth persisting as semantic memories.
const MEMORABLE_PATTERNS: &[&str] = &[
    "my name is",
    "i prefer",
    "please remember",
    "remember that",
    "call me",
    "i like",
    "i live in",
];

/// In-process projection of a conversation; non-authoritative.
#[derive(Debug, Default)]
struct ConversationState {
    turn_count: u32,
    topics: VecDeque<String>,
}

impl ConversationState {
    /// Track words longer than five characters in a bounded topic ring.
    fn note_topics(&mut self, text: &str) {
        for word in text.split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if word.len() > 5 && !self.topics.contains(&word) {
                self.topics.push_back(word);
                while self.topics.len() > 5 {
                    self.topics.pop_front();
                }
            }
        }
    }

    fn summary(&self) -> Option<String> {
        if self.turn_count == 0 {
            return None;
        }
        let mut summary = format!("Turns so far: {}.", self.turn_count);
        if !self.topics.is_empty() {
            summary.push_str(&format!(
                " Recent topics: {}.",
                self.topics.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        Some(summary)
    }
}

pub struct Orchestrator {
    intent_agent: IntentAgent,
    planner: PlannerAgent,
    executor: ExecutorAgent,
    verifier: VerifierAgent,
    explainer: ExplainerAgent,
    memory: Option<Arc<MemoryManager>>,
    max_retries: u32,
    conversations: Mutex<HashMap<String, ConversationState>>,
    pending_clarifications: Mutex<HashMap<String, String>>,
}

impl Orchestrator {
    pub fn new(
        llm: Option<Arc<dyn LanguageModel>>,
        memory: Option<Arc<MemoryManager>>,
        tool_repo: Option<Arc<ToolRepository>>,
        sandbox: Option<Arc<DockerSandbox>>,
        discovery: Option<Arc<ToolDiscoveryAgent>>,
        max_retries: u32,
    ) -> Self {
        let orchestrator = Self {
            intent_agent: IntentAgent::new(llm.clone()),
            planner: PlannerAgent::new(llm.clone()),
            executor: ExecutorAgent::new(
                llm.clone(),
                memory.clone(),
                tool_repo,
                sandbox,
                discovery,
            ),
            verifier: VerifierAgent::new(llm.clone()),
            explainer: ExplainerAgent::new(llm),
            memory,
            max_retries,
            conversations: Mutex::new(HashMap::new()),
            pending_clarifications: Mutex::new(HashMap::new()),
        };
        info!(max_retries, "Agent orchestrator initialized");
        orchestrator
    }

    /// Tools eligible for planning are registered here.
    pub fn planner(&self) -> &PlannerAgent {
        &self.planner
    }

    /// Process one utterance. Never panics the caller: any internal error
    /// becomes a fixed apology with zero confidence.
    pub async fn process_message(&self, text: &str, conversation_id: &str) -> AgentResult {
        info!(
            conversation_id,
            message_length = text.len(),
            "Processing message"
        );

        match self.process_inner(text, conversation_id).await {
            Ok(result) => result,
            Err(e) => {
                error!(conversation_id, "Error processing message: {e}");
                AgentResult {
                    response: APOLOGY_RESPONSE.to_string(),
                    reasoning: Some(format!("Error: {e}")),
                    confidence: 0.0,
                }
            }
        }
    }

    async fn process_inner(&self, text: &str, conversation_id: &str) -> Result<AgentResult> {
        // 1. Get or create the conversation context.
        self.conversations
            .lock()
            .await
            .entry(conversation_id.to_string())
            .or_default();

        // 2. Best-effort user turn write.
        self.write_turn(conversation_id, TurnRole::User, text).await;

        // 3. A pending clarification is consumed by the next message.
        if self
            .pending_clarifications
            .lock()
            .await
            .remove(conversation_id)
            .is_some()
        {
            debug!(conversation_id, "Consuming pending clarification");
            let combined = format!("[Clarification] {text}");
            return Ok(Box::pin(self.process_message(&combined, conversation_id)).await);
        }

        let state_summary = self
            .conversations
            .lock()
            .await
            .get(conversation_id)
            .and_then(ConversationState::summary);

        // 4 + 5. Memory retrieval and intent interpretation run
        // concurrently.
        let (memory_context, intent) = tokio::join!(
            self.retrieve_memory(text, conversation_id),
            self.intent_agent.interpret(text, state_summary.as_deref()),
        );

        // 6. Extend the planning context with retrieved summaries.
        let planner_context = build_planner_context(state_summary, memory_context.as_ref());

        // 7. Fast path for small talk.
        if is_fast_path(&intent, text) {
            debug!(conversation_id, "Fast path engaged");
            return self
                .fast_path(&intent, text, conversation_id, memory_context.as_ref())
                .await;
        }

        // 8. Full pipeline: plan, possibly suspend for clarification.
        let plan = self
            .planner
            .create_plan(&intent, planner_context.as_deref())
            .await;

        if plan.needs_clarification() {
            info!(conversation_id, "Plan requires clarification; suspending");
            self.pending_clarifications
                .lock()
                .await
                .insert(conversation_id.to_string(), text.to_string());
            self.finish_turn(conversation_id, text, CLARIFICATION_QUESTION, false)
                .await;
            return Ok(AgentResult {
                response: CLARIFICATION_QUESTION.to_string(),
                reasoning: Some("Awaiting clarification from the user".to_string()),
                confidence: 0.5,
            });
        }

        // 9. Execute with the full memory context.
        let history = self.recent_history(conversation_id).await;
        let mut result = self
            .executor
            .execute(&plan, &history, memory_context.as_ref(), None)
            .await;

        // 10. Verify, retrying execution on correction signals.
        let mut verification = if plan.requires_verification {
            self.verifier.verify(&result, Some(text)).await
        } else {
            verification_skipped()
        };

        let mut attempts = 0;
        while plan.requires_verification && verification.requires_correction {
            if attempts >= self.max_retries {
                warn!(
                    conversation_id,
                    attempts, "Correction retries exhausted; keeping last result"
                );
                break;
            }
            attempts += 1;
            info!(conversation_id, attempt = attempts, "Re-executing after correction signal");

            let correction = format!(
                "Previous attempt had issues: {}",
                verification.issues.join("; ")
            );
            result = self
                .executor
                .execute(&plan, &history, memory_context.as_ref(), Some(&correction))
                .await;
            verification = self.verifier.verify(&result, Some(text)).await;
        }

        // 11. Explanation, elided when the plan says so and output exists.
        let (response, reasoning) = if !plan.requires_explanation && result.final_output.is_some() {
            (result.final_text().unwrap_or_default(), None)
        } else {
            let explanation = self.explainer.explain(&intent, &result, &verification).await;
            let mut reasoning = explanation.reasoning;
            if let Some(note) = explanation.confidence_note {
                reasoning = Some(match reasoning {
                    Some(text) => format!("{text} | {note}"),
                    None => note,
                });
            }
            (explanation.response, reasoning)
        };

        // 12 + 13. State update, assistant turn, memorable-fact capture.
        self.finish_turn(conversation_id, text, &response, true).await;

        // 14.
        Ok(AgentResult {
            response,
            reasoning,
            confidence: verification.confidence.clamp(0.0, 1.0),
        })
    }

    /// Single-step shortcut: one response step, no verifier, no explainer.
    async fn fast_path(
        &self,
        intent: &Intent,
        text: &str,
        conversation_id: &str,
        memory_context: Option<&MemoryContext>,
    ) -> Result<AgentResult> {
        let mut plan = ExecutionPlan::new(
            intent.clone(),
            vec![PlanStep::new(
                StepType::LlmResponse,
                "Respond conversationally",
            )],
        );
        plan.requires_verification = false;
        plan.requires_explanation = false;

        let history = self.recent_history(conversation_id).await;
        let result = self
            .executor
            .execute(&plan, &history, memory_context, None)
            .await;

        let response = result
            .final_text()
            .unwrap_or_else(|| APOLOGY_RESPONSE.to_string());

        self.finish_turn(conversation_id, text, &response, true).await;

        Ok(AgentResult {
            response,
            reasoning: Some("Simple conversational response".to_string()),
            confidence: 1.0,
        })
    }

    /// Drop the in-process context and any pending clarification, and
    /// clear the ephemeral turn list.
    pub async fn clear_conversation(&self, conversation_id: &str) {
        self.conversations.lock().await.remove(conversation_id);
        self.pending_clarifications
            .lock()
            .await
            .remove(conversation_id);
        if let Some(memory) = &self.memory {
            if let Err(e) = memory.clear_conversation_turns(conversation_id).await {
                debug!("Ephemeral store unavailable during clear: {e}");
            }
        }
        info!(conversation_id, "Conversation context cleared");
    }

    pub async fn has_pending_clarification(&self, conversation_id: &str) -> bool {
        self.pending_clarifications
            .lock()
            .await
            .contains_key(conversation_id)
    }

    async fn retrieve_memory(
        &self,
        text: &str,
        conversation_id: &str,
    ) -> Option<MemoryContext> {
        let memory = self.memory.as_ref()?;
        Some(
            memory
                .retrieve_context(text, Some(conversation_id), PRE_RETRIEVAL_TOKEN_LIMIT)
                .await,
        )
    }

    async fn recent_history(&self, conversation_id: &str) -> Vec<(String, String)> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        match memory.get_recent_turns(conversation_id, 10).await {
            Ok(turns) => turns
                .into_iter()
                .map(|turn| (turn.role.as_str().to_string(), turn.content))
                .collect(),
            Err(e) => {
                warn!("Failed to read conversation history: {e}");
                Vec::new()
            }
        }
    }

    async fn write_turn(&self, conversation_id: &str, role: TurnRole, content: &str) {
        if let Some(memory) = &self.memory {
            if let Err(e) = memory.store_turn(conversation_id, role, content).await {
                warn!("Failed to store {} turn: {e}", role.as_str());
            }
        }
    }

    /// Shared tail of every completed turn: update in-process state, write
    /// the assistant turn, and capture memorable facts from the user text.
    async fn finish_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        response: &str,
        capture_facts: bool,
    ) {
        {
            let mut conversations = self.conversations.lock().await;
            let state = conversations
                .entry(conversation_id.to_string())
                .or_default();
            state.turn_count += 1;
            state.note_topics(user_text);
        }

        self.write_turn(conversation_id, TurnRole::Assistant, response)
            .await;

        if capture_facts {
            self.capture_memorable_fact(conversation_id, user_text).await;
        }
    }

    /// Persist utterances that match the memorable-fact patterns, under an
    /// auto-approval at 0.8 confidence. The writer's own gates still
    /// apply.
    async fn capture_memorable_fact(&self, conversation_id: &str, user_text: &str) {
        let Some(memory) = &self.memory else {
            return;
        };

        let lower = user_text.to_lowercase();
        if !MEMORABLE_PATTERNS
            .iter()
            .any(|pattern| lower.contains(pattern))
        {
            return;
        }

        let request = WriteRequest {
            memory_type: slovo_core::models::MemoryKind::Semantic,
            content: user_text.to_string(),
            source: MemorySource::Conversation,
            confidence: 0.8,
            conversation_id: Some(conversation_id.to_string()),
            metadata: HashMap::new(),
        };
        let approval = VerifierApproval {
            approved: true,
            confidence: 0.8,
            reason: "Auto-captured memorable fact".to_string(),
            adjusted_content: None,
        };

        let result = memory.write_memory(&request, &approval).await;
        if result.success {
            debug!(conversation_id, "Memorable fact captured");
        } else if let Some(error) = result.error {
            debug!(conversation_id, "Memorable fact not captured: {error}");
        }
    }
}

fn build_planner_context(
    state_summary: Option<String>,
    memory_context: Option<&MemoryContext>,
) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(summary) = state_summary {
        parts.push(summary);
    }
    if let Some(context) = memory_context {
        for section in [
            &context.profile_summary,
            &context.conversation_summary,
            &context.semantic_summary,
            &context.episodic_summary,
        ] {
            if !section.is_empty() {
                parts.push(section.clone());
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Fast-path gate: conversational intents, or tool-free questions that
/// read as small talk.
fn is_fast_path(intent: &Intent, text: &str) -> bool {
    if intent.intent_type == IntentType::Conversation {
        return true;
    }
    if intent.intent_type == IntentType::Question && !intent.requires_tool {
        let lower = text.to_lowercase();
        let words: Vec<String> = lower
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .collect();
        // Multi-word phrases match as substrings; single words must match
        // whole words ("this" is not a greeting).
        return SMALLTALK_LEXICON.iter().any(|phrase| {
            if phrase.contains(' ') {
                lower.contains(phrase)
            } else {
                words.iter().any(|word| word == phrase)
            }
        });
    }
    false
}

fn verification_skipped() -> Verification {
    Verification {
        is_valid: true,
        confidence: 1.0,
        issues: Vec::new(),
        suggestions: Vec::new(),
        requires_correction: false,
        correction_hint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(None, None, None, None, None, 2)
    }

    #[tokio::test]
    async fn greeting_takes_fast_path_with_full_confidence() {
        let orchestrator = orchestrator();
        let result = orchestrator.process_message("Hello", "c1").await;

        assert_eq!(result.confidence, 1.0);
        assert_eq!(
            result.reasoning.as_deref(),
            Some("Simple conversational response")
        );
        assert!(result.response.contains("Hello"));
    }

    #[tokio::test]
    async fn question_runs_full_pipeline() {
        let orchestrator = orchestrator();
        let result = orchestrator
            .process_message("What is the capital of France?", "c1")
            .await;

        // Heuristic pipeline: executor fallback output, verifier passes,
        // explainer reasoning mentions the intent.
        assert!(result.confidence > 0.9);
        assert!(result
            .reasoning
            .as_deref()
            .unwrap()
            .contains("Understood intent: question"));
    }

    #[tokio::test]
    async fn empty_utterance_suspends_for_clarification() {
        let orchestrator = orchestrator();
        let result = orchestrator.process_message("", "c1").await;

        assert_eq!(result.confidence, 0.5);
        assert!(orchestrator.has_pending_clarification("c1").await);

        // The next message consumes the pending clarification and gets a
        // real response.
        let followup = orchestrator.process_message("tell me a joke", "c1").await;
        assert!(!orchestrator.has_pending_clarification("c1").await);
        assert!(followup.confidence > 0.5);
    }

    #[tokio::test]
    async fn clarification_is_scoped_per_conversation() {
        let orchestrator = orchestrator();
        orchestrator.process_message("", "c1").await;

        assert!(orchestrator.has_pending_clarification("c1").await);
        assert!(!orchestrator.has_pending_clarification("c2").await);

        orchestrator.clear_conversation("c1").await;
        assert!(!orchestrator.has_pending_clarification("c1").await);
    }

    #[tokio::test]
    async fn conversations_track_topics_in_bounded_ring() {
        let mut state = ConversationState::default();
        state.note_topics("the weather yesterday was wonderful in Reykjavik");
        assert!(state.topics.contains(&"weather".to_string()));
        assert!(state.topics.contains(&"reykjavik".to_string()));

        state.note_topics("discussing astronomy telescopes planets galaxies constellations");
        assert!(state.topics.len() <= 5);
    }

    #[test]
    fn fast_path_gate_matches_smalltalk_questions_only() {
        let mut question = Intent::new(IntentType::Question, "how are you?");
        assert!(is_fast_path(&question, "how are you?"));

        question.requires_tool = true;
        assert!(!is_fast_path(&question, "how are you?"));

        let factual = Intent::new(IntentType::Question, "what is the GDP of France?");
        assert!(!is_fast_path(&factual, "what is the GDP of France?"));

        let chat = Intent::new(IntentType::Conversation, "nice weather today");
        assert!(is_fast_path(&chat, "nice weather today"));
    }
}
