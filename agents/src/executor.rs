//! Executor agent.
//!
//! Walks plan steps in index order, feeding each step the accumulated
//! context of its predecessors. The first failing step halts execution;
//! later steps are never attempted.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use slovo_core::llm::{LanguageModel, LlmMessage};
use slovo_core::models::{
    ExecutionPlan, ExecutionResult, MemoryContext, PlanStep, StepResult, StepType,
};
use slovo_memory::MemoryManager;
use slovo_tools::{DockerSandbox, ToolDiscoveryAgent, ToolRepository};

const LLM_RESPONSE_SYSTEM_PROMPT: &str = "You are Slovo, a helpful, intelligent voice assistant.
You are friendly, knowledgeable, and aim to provide accurate, helpful responses.

Guidelines:
1. Be conversational but informative
2. If you're uncertain about something, say so honestly
3. Keep responses concise but complete
4. Use the provided context to give relevant, personalized responses
5. If the user's request requires capabilities you don't have, explain what you can help with instead";

/// Token budget for step-initiated memory retrieval, smaller than the
/// orchestrator's pre-retrieval.
const STEP_RETRIEVAL_TOKEN_LIMIT: usize = 1500;

pub struct ExecutorAgent {
    llm: Option<Arc<dyn LanguageModel>>,
    memory: Option<Arc<MemoryManager>>,
    tool_repo: Option<Arc<ToolRepository>>,
    sandbox: Option<Arc<DockerSandbox>>,
    discovery: Option<Arc<ToolDiscoveryAgent>>,
}

impl ExecutorAgent {
    pub fn new(
        llm: Option<Arc<dyn LanguageModel>>,
        memory: Option<Arc<MemoryManager>>,
        tool_repo: Option<Arc<ToolRepository>>,
        sandbox: Option<Arc<DockerSandbox>>,
        discovery: Option<Arc<ToolDiscoveryAgent>>,
    ) -> Self {
        info!(
            has_llm = llm.is_some(),
            has_memory = memory.is_some(),
            has_sandbox = sandbox.is_some(),
            "Executor agent initialized"
        );
        Self {
            llm,
            memory,
            tool_repo,
            sandbox,
            discovery,
        }
    }

    /// Execute a plan. `correction_context` carries issues from a prior
    /// attempt when the orchestrator retries after verification.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        conversation_history: &[(String, String)],
        memory_context: Option<&MemoryContext>,
        correction_context: Option<&str>,
    ) -> ExecutionResult {
        debug!(
            steps = plan.steps.len(),
            has_memory = memory_context.is_some(),
            "Executing plan"
        );

        let mut step_results: Vec<StepResult> = Vec::with_capacity(plan.steps.len());
        let mut step_outputs: HashMap<usize, serde_json::Value> = HashMap::new();

        for (index, step) in plan.steps.iter().enumerate() {
            let result = self
                .execute_step(
                    step,
                    index,
                    plan,
                    &step_outputs,
                    conversation_history,
                    memory_context,
                    correction_context,
                )
                .await;

            let failed = !result.success;
            if let Some(output) = &result.output {
                step_outputs.insert(index, output.clone());
            }
            let error = result.error.clone();
            step_results.push(result);

            if failed {
                warn!(step_index = index, error = ?error, "Step failed, halting execution");
                return ExecutionResult {
                    plan: plan.clone(),
                    success: false,
                    step_results,
                    final_output: None,
                    error,
                };
            }
        }

        let final_output = step_results.last().and_then(|r| r.output.clone());
        ExecutionResult {
            plan: plan.clone(),
            success: true,
            step_results,
            final_output,
            error: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        step: &PlanStep,
        index: usize,
        plan: &ExecutionPlan,
        step_outputs: &HashMap<usize, serde_json::Value>,
        conversation_history: &[(String, String)],
        memory_context: Option<&MemoryContext>,
        correction_context: Option<&str>,
    ) -> StepResult {
        debug!(index, step_type = step.step_type.as_str(), "Executing step");

        match step.step_type {
            StepType::MemoryRetrieval => self.execute_memory_retrieval(index, plan).await,
            StepType::ToolExecution => self.execute_tool(step, index, plan).await,
            StepType::ToolDiscovery => self.execute_tool_discovery(index, plan).await,
            StepType::LlmResponse => {
                self.execute_llm_response(
                    index,
                    plan,
                    step_outputs,
                    conversation_history,
                    memory_context,
                    correction_context,
                )
                .await
            }
            StepType::Clarification => {
                StepResult::ok(index, json!({"needs_clarification": true}))
            }
        }
    }

    /// Step-initiated retrieval beyond the orchestrator's pre-retrieval,
    /// under a smaller budget.
    async fn execute_memory_retrieval(&self, index: usize, plan: &ExecutionPlan) -> StepResult {
        let Some(memory) = &self.memory else {
            warn!("No memory manager available for memory retrieval step");
            return StepResult::ok(
                index,
                json!({"relevant_context": "Memory system not configured"}),
            );
        };

        let context = memory
            .retrieve_context(&plan.intent.text, None, STEP_RETRIEVAL_TOKEN_LIMIT)
            .await;

        let mut parts: Vec<String> = Vec::new();
        if !context.profile_summary.is_empty() {
            parts.push(format!("Profile: {}", context.profile_summary));
        }
        if !context.semantic_summary.is_empty() {
            parts.push(format!("Memories: {}", context.semantic_summary));
        }
        if !context.conversation_summary.is_empty() {
            parts.push(format!("Recent: {}", context.conversation_summary));
        }
        if !context.episodic_summary.is_empty() {
            parts.push(format!("Past actions: {}", context.episodic_summary));
        }

        debug!(
            token_estimate = context.total_token_estimate,
            "Step memory retrieval completed"
        );
        StepResult::ok(
            index,
            json!({
                "relevant_context": parts.join(" | "),
                "token_estimate": context.total_token_estimate,
            }),
        )
    }

    /// Resolve the named tool, enforce its lifecycle status and run it in
    /// the sandbox.
    async fn execute_tool(&self, step: &PlanStep, index: usize, plan: &ExecutionPlan) -> StepResult {
        let Some(tool_name) = &step.tool_name else {
            return StepResult::failed(index, "No tool name specified");
        };

        let (Some(tool_repo), Some(sandbox)) = (&self.tool_repo, &self.sandbox) else {
            warn!("Tool execution not configured, skipping");
            return StepResult::ok(
                index,
                json!({
                    "tool_name": tool_name,
                    "result": "Tool execution unavailable (sandbox not configured)",
                }),
            );
        };

        let manifest = match tool_repo.get_manifest_by_name(tool_name).await {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return StepResult::failed(index, format!("Tool not found: {tool_name}")),
            Err(e) => return StepResult::failed(index, format!("Tool lookup failed: {e}")),
        };

        if !manifest.status.is_executable() {
            return StepResult::failed(
                index,
                format!(
                    "Tool '{}' is not executable in status {}",
                    tool_name,
                    manifest.status.as_str()
                ),
            );
        }

        let permissions = match tool_repo.list_permissions(manifest.id).await {
            Ok(permissions) => permissions,
            Err(e) => return StepResult::failed(index, format!("Permission lookup failed: {e}")),
        };

        let params = step
            .tool_params
            .clone()
            .map(|map| serde_json::Value::Object(map.into_iter().collect()))
            .unwrap_or_else(|| json!({}));

        match sandbox
            .execute_tool(&manifest, &permissions, &params, None, None)
            .await
        {
            Ok(outcome) if outcome.status == slovo_core::models::ExecutionStatus::Success => {
                StepResult::ok(
                    index,
                    json!({
                        "tool_name": tool_name,
                        "result": outcome.output,
                        "execution_id": outcome.execution_id.to_string(),
                        "duration_ms": outcome.duration_ms,
                    }),
                )
            }
            Ok(outcome) => StepResult::failed(
                index,
                outcome
                    .error_message
                    .unwrap_or_else(|| "Tool execution failed".to_string()),
            ),
            Err(e) => {
                error!(tool = %tool_name, intent = %plan.intent.text, "Tool execution error: {e}");
                StepResult::failed(index, format!("Tool execution failed: {e}"))
            }
        }
    }

    /// Queue a discovery request; never blocks on resolution.
    async fn execute_tool_discovery(&self, index: usize, plan: &ExecutionPlan) -> StepResult {
        let Some(discovery) = &self.discovery else {
            warn!("No tool discovery agent available");
            return StepResult::ok(
                index,
                json!({"recommendation": "Tool discovery not configured"}),
            );
        };

        let capability = plan.intent.text.trim();
        if capability.is_empty() {
            return StepResult::failed(
                index,
                "Cannot discover tool: no capability description provided",
            );
        }

        match discovery.discover_tool(capability, "executor").await {
            Ok(request) => StepResult::ok(
                index,
                json!({
                    "discovery_request_id": request.id.to_string(),
                    "status": "queued",
                    "recommendation": "Tool discovery request queued. Manual approval required.",
                }),
            ),
            Err(e) => StepResult::failed(index, format!("Tool discovery failed: {e}")),
        }
    }

    async fn execute_llm_response(
        &self,
        index: usize,
        plan: &ExecutionPlan,
        step_outputs: &HashMap<usize, serde_json::Value>,
        conversation_history: &[(String, String)],
        memory_context: Option<&MemoryContext>,
        correction_context: Option<&str>,
    ) -> StepResult {
        let Some(llm) = &self.llm else {
            return StepResult::ok(index, json!(fallback_response(&plan.intent.text)));
        };

        let messages = build_response_messages(
            plan,
            step_outputs,
            conversation_history,
            memory_context,
        );

        let mut system = LLM_RESPONSE_SYSTEM_PROMPT.to_string();
        if let Some(correction) = correction_context {
            system = format!("{system}\n\n{correction}");
        }

        match llm.generate(&messages, Some(&system)).await {
            Ok(response) => {
                debug!(
                    tokens = response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
                    "Model response generated"
                );
                StepResult::ok(index, json!(response.content))
            }
            Err(e) => {
                error!("Model response generation failed: {e}");
                StepResult::failed(index, format!("Failed to generate response: {e}"))
            }
        }
    }
}

/// Compose the model conversation: recent history, then one user message
/// carrying the memory context, tool outputs and the request itself.
fn build_response_messages(
    plan: &ExecutionPlan,
    step_outputs: &HashMap<usize, serde_json::Value>,
    conversation_history: &[(String, String)],
    memory_context: Option<&MemoryContext>,
) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::new();

    let start = conversation_history.len().saturating_sub(10);
    for (role, content) in &conversation_history[start..] {
        if role == "user" {
            messages.push(LlmMessage::user(content.clone()));
        } else {
            messages.push(LlmMessage::assistant(content.clone()));
        }
    }

    let mut context_parts: Vec<String> = Vec::new();
    if let Some(context) = memory_context {
        if !context.profile_summary.is_empty() {
            context_parts.push(format!("User Profile: {}", context.profile_summary));
        }
        if !context.semantic_summary.is_empty() {
            context_parts.push(format!(
                "Relevant Memories (use to personalize the response): {}",
                context.semantic_summary
            ));
        }
        if !context.conversation_summary.is_empty() {
            context_parts.push(format!(
                "Recent Conversation: {}",
                context.conversation_summary
            ));
        }
        if !context.episodic_summary.is_empty() {
            context_parts.push(format!("Past Actions: {}", context.episodic_summary));
        }
    }

    let mut indices: Vec<&usize> = step_outputs.keys().collect();
    indices.sort();
    for i in indices {
        let output = &step_outputs[i];
        if let Some(tool_name) = output.get("tool_name").and_then(|v| v.as_str()) {
            context_parts.push(format!(
                "Tool '{}' result: {}",
                tool_name,
                output.get("result").unwrap_or(&serde_json::Value::Null)
            ));
        } else if let Some(relevant) = output.get("relevant_context").and_then(|v| v.as_str()) {
            if !relevant.is_empty() {
                context_parts.push(format!("Retrieved context: {relevant}"));
            }
        }
    }

    let intent = &plan.intent.text;
    let user_message = if context_parts.is_empty() {
        intent.clone()
    } else {
        format!(
            "Context:\n{}\n\nUser request: {}\n\nPlease provide a helpful response based on the above context.",
            context_parts.join("\n"),
            intent
        )
    };
    messages.push(LlmMessage::user(user_message));

    messages
}

/// Static reply used when no model is configured.
fn fallback_response(intent_text: &str) -> String {
    let echo: String = intent_text.chars().take(100).collect();
    let ellipsis = if intent_text.chars().count() > 100 {
        "..."
    } else {
        ""
    };
    format!(
        "Hello! I'm Slovo, your voice assistant. I received your message: \"{echo}{ellipsis}\". \
         I'm currently running in limited mode without full language model capabilities. \
         Please ensure your API keys are configured to enable intelligent responses."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use slovo_core::models::{Intent, IntentType};

    fn plan_with_steps(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan::new(Intent::new(IntentType::Question, "what is rust?"), steps)
    }

    #[tokio::test]
    async fn llm_response_falls_back_without_model() {
        let executor = ExecutorAgent::new(None, None, None, None, None);
        let plan = plan_with_steps(vec![PlanStep::new(
            StepType::LlmResponse,
            "generate response",
        )]);

        let result = executor.execute(&plan, &[], None, None).await;
        assert!(result.success);
        let text = result.final_text().unwrap();
        assert!(text.contains("what is rust?"));
        assert!(text.contains("limited mode"));
    }

    #[tokio::test]
    async fn clarification_step_marks_need_for_input() {
        let executor = ExecutorAgent::new(None, None, None, None, None);
        let plan = plan_with_steps(vec![PlanStep::new(StepType::Clarification, "ask user")]);

        let result = executor.execute(&plan, &[], None, None).await;
        assert!(result.success);
        assert_eq!(
            result.final_output.unwrap()["needs_clarification"],
            serde_json::json!(true)
        );
    }

    #[tokio::test]
    async fn tool_step_without_name_fails_and_halts() {
        let executor = ExecutorAgent::new(None, None, None, None, None);
        let plan = plan_with_steps(vec![
            PlanStep::new(StepType::ToolExecution, "run unnamed tool"),
            PlanStep::new(StepType::LlmResponse, "never reached"),
        ]);

        let result = executor.execute(&plan, &[], None, None).await;
        assert!(!result.success);
        // The failing step halts the walk; the response step never ran.
        assert_eq!(result.step_results.len(), 1);
        assert!(result.final_output.is_none());
    }

    #[tokio::test]
    async fn missing_memory_manager_degrades_gracefully() {
        let executor = ExecutorAgent::new(None, None, None, None, None);
        let plan = plan_with_steps(vec![
            PlanStep::new(StepType::MemoryRetrieval, "retrieve context"),
            PlanStep::new(StepType::LlmResponse, "generate response"),
        ]);

        let result = executor.execute(&plan, &[], None, None).await;
        assert!(result.success);
        assert_eq!(result.step_results.len(), 2);
    }

    #[test]
    fn response_messages_carry_memory_context() {
        let plan = plan_with_steps(vec![]);
        let context = MemoryContext {
            profile_summary: "User preferences: Languages: en.".to_string(),
            conversation_summary: "Recent conversation:\n- User: My name is Alex".to_string(),
            semantic_summary: String::new(),
            episodic_summary: String::new(),
            total_token_estimate: 20,
        };

        let messages = build_response_messages(&plan, &HashMap::new(), &[], Some(&context));
        let prompt = &messages.last().unwrap().content;
        assert!(prompt.contains("My name is Alex"));
        assert!(prompt.contains("User request: what is rust?"));
    }

    #[test]
    fn response_messages_include_tool_results_in_order() {
        let plan = plan_with_steps(vec![]);
        let mut outputs = HashMap::new();
        outputs.insert(1, json!({"tool_name": "weather", "result": "21C"}));
        outputs.insert(
            0,
            json!({"relevant_context": "Profile: User preferences: Languages: en."}),
        );

        let messages = build_response_messages(&plan, &outputs, &[], None);
        let prompt = &messages.last().unwrap().content;
        let retrieved_pos = prompt.find("Retrieved context").unwrap();
        let tool_pos = prompt.find("Tool 'weather'").unwrap();
        assert!(retrieved_pos < tool_pos);
    }

    #[test]
    fn fallback_truncates_long_intents() {
        let long = "x".repeat(150);
        let response = fallback_response(&long);
        assert!(response.contains(&format!("{}...", "x".repeat(100))));
    }
}
