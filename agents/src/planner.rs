//! Planner agent.
//!
//! Turns an intent into an ordered, dependency-annotated plan, deciding
//! between existing tools and tool discovery. The fallback template is
//! memory retrieval, an optional tool step, and a final model response
//! depending on everything before it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Deserialize;
use tracing::{debug, info, warn};

use slovo_core::llm::{generate_structured, LanguageModel, LlmMessage};
use slovo_core::models::{
    ExecutionPlan, Intent, IntentType, PlanComplexity, PlanStep, RiskLevel, StepType,
    ToolManifest,
};

const PLANNER_SYSTEM_PROMPT: &str = "You are an execution planning system for a voice assistant called Slovo.
Your job is to create optimal execution plans for user requests.

Available step types:
- llm_response: Generate a response using language model reasoning
- tool_execution: Execute a specific tool (requires tool_name)
- tool_discovery: Search for and integrate a new tool capability
- memory_retrieval: Retrieve relevant context from long-term memory
- clarification: Request clarification from the user

Planning guidelines:
1. Always start with memory_retrieval to gather context
2. Minimize the number of steps while ensuring completeness
3. Use tool_execution only when necessary (real-time data, calculations)
4. If a required capability is missing, include tool_discovery
5. Always end with llm_response to synthesize results
6. Request clarification if the intent is unclear or missing critical information
7. Consider step dependencies carefully

Only use tools that are listed as available.";

const PLAN_SCHEMA: &str = r#"{
  "steps": [{
    "action_type": "memory_retrieval | tool_execution | tool_discovery | llm_response | clarification",
    "description": "string",
    "tool_name": "string or null",
    "depends_on": [0]
  }],
  "complexity": "simple | moderate | complex | very_complex",
  "risk_level": "low | medium | high",
  "confidence": 0.0
}"#;

#[derive(Debug, Deserialize)]
struct PlannedStep {
    action_type: String,
    description: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    depends_on: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct PlanAnalysis {
    steps: Vec<PlannedStep>,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    risk_level: Option<String>,
}

pub struct PlannerAgent {
    llm: Option<Arc<dyn LanguageModel>>,
    /// Tools eligible for planning. Touched only from the orchestrator
    /// task that owns the request.
    registered_tools: RwLock<HashMap<String, ToolManifest>>,
}

impl PlannerAgent {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>) -> Self {
        info!(has_llm = llm.is_some(), "Planner agent initialized");
        Self {
            llm,
            registered_tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_tool(&self, manifest: ToolManifest) {
        info!(tool = %manifest.name, "Tool registered with planner");
        self.registered_tools
            .write()
            .expect("registered tools lock poisoned")
            .insert(manifest.name.clone(), manifest);
    }

    pub fn unregister_tool(&self, name: &str) {
        if self
            .registered_tools
            .write()
            .expect("registered tools lock poisoned")
            .remove(name)
            .is_some()
        {
            info!(tool = name, "Tool unregistered from planner");
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registered_tools
            .read()
            .expect("registered tools lock poisoned")
            .contains_key(name)
    }

    /// Produce a plan for the intent.
    pub async fn create_plan(
        &self,
        intent: &Intent,
        conversation_context: Option<&str>,
    ) -> ExecutionPlan {
        debug!(intent_type = intent.intent_type.as_str(), "Creating execution plan");

        if let Some(llm) = &self.llm {
            match self.llm_plan(llm.as_ref(), intent, conversation_context).await {
                Ok(plan) => return plan,
                Err(e) => warn!("Model planning failed, using heuristics: {e}"),
            }
        }

        self.heuristic_plan(intent)
    }

    async fn llm_plan(
        &self,
        llm: &dyn LanguageModel,
        intent: &Intent,
        conversation_context: Option<&str>,
    ) -> Result<ExecutionPlan, slovo_core::llm::LlmError> {
        let tools_context = self.tools_context();
        let mut user_content = format!(
            "Create an execution plan for this request:\n\n\
             Intent: {}\nType: {}\nRequires Tool: {}\nTool Hint: {}\nConfidence: {}\n\n{}",
            intent.text,
            intent.intent_type.as_str(),
            intent.requires_tool,
            intent.tool_hint.as_deref().unwrap_or("None"),
            intent.confidence,
            tools_context,
        );
        if let Some(context) = conversation_context {
            user_content = format!("Conversation context:\n{context}\n\n{user_content}");
        }
        let messages = vec![LlmMessage::user(user_content)];

        let analysis: PlanAnalysis =
            generate_structured(llm, &messages, PLANNER_SYSTEM_PROMPT, PLAN_SCHEMA).await?;

        let steps: Vec<PlanStep> = analysis
            .steps
            .into_iter()
            .map(|step| {
                let step_type = match step.action_type.to_lowercase().as_str() {
                    "memory_retrieval" => StepType::MemoryRetrieval,
                    "tool_execution" => StepType::ToolExecution,
                    "tool_discovery" => StepType::ToolDiscovery,
                    "clarification" => StepType::Clarification,
                    _ => StepType::LlmResponse,
                };
                PlanStep {
                    step_type,
                    description: step.description,
                    tool_name: step.tool_name,
                    tool_params: None,
                    depends_on: step.depends_on,
                }
            })
            .collect();

        let complexity = match analysis.complexity.as_deref() {
            Some("moderate") => PlanComplexity::Moderate,
            Some("complex") => PlanComplexity::Complex,
            Some("very_complex") => PlanComplexity::VeryComplex,
            _ => PlanComplexity::Simple,
        };
        let risk_level = match analysis.risk_level.as_deref() {
            Some("medium") => RiskLevel::Medium,
            Some("high") => RiskLevel::High,
            _ => RiskLevel::Low,
        };

        let mut plan = ExecutionPlan::new(intent.clone(), steps);
        plan.complexity = complexity;
        plan.risk_level = risk_level;

        debug!(steps = plan.steps.len(), "Execution plan created");
        Ok(plan)
    }

    /// Template fallback. Unknown or empty intents get a clarification
    /// plan; a tool-needing intent gets either its hinted tool or a
    /// discovery step; everything funnels into a final model response.
    fn heuristic_plan(&self, intent: &Intent) -> ExecutionPlan {
        debug!("Using heuristic planning (no LLM)");

        if intent.intent_type == IntentType::Unknown || intent.text.trim().is_empty() {
            let step = PlanStep::new(
                StepType::Clarification,
                "Ask the user what they would like to do",
            );
            let mut plan = ExecutionPlan::new(intent.clone(), vec![step]);
            plan.requires_explanation = false;
            return plan;
        }

        let mut steps = vec![PlanStep::new(
            StepType::MemoryRetrieval,
            "Retrieve relevant context from memory",
        )];

        if intent.requires_tool {
            let hinted = intent
                .tool_hint
                .as_deref()
                .filter(|hint| self.has_tool(hint));
            match hinted {
                Some(tool_name) => {
                    let mut step = PlanStep::new(
                        StepType::ToolExecution,
                        format!("Execute {tool_name} tool"),
                    );
                    step.tool_name = Some(tool_name.to_string());
                    step.depends_on = vec![0];
                    steps.push(step);
                }
                None => {
                    let mut step = PlanStep::new(
                        StepType::ToolDiscovery,
                        "Discover an appropriate tool for the request",
                    );
                    step.depends_on = vec![0];
                    steps.push(step);
                }
            }
        }

        let mut response_step = PlanStep::new(
            StepType::LlmResponse,
            "Generate response based on context and results",
        );
        response_step.depends_on = (0..steps.len()).collect();
        steps.push(response_step);

        let mut plan = ExecutionPlan::new(intent.clone(), steps);
        plan.complexity = if plan.steps.len() <= 3 {
            PlanComplexity::Simple
        } else {
            PlanComplexity::Complex
        };
        plan.risk_level = if intent.requires_tool {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        plan
    }

    fn tools_context(&self) -> String {
        let tools = self
            .registered_tools
            .read()
            .expect("registered tools lock poisoned");
        if tools.is_empty() {
            return "Available tools: None".to_string();
        }

        let mut lines = vec!["Available tools:".to_string()];
        for (name, manifest) in tools.iter() {
            lines.push(format!("- {name}: {}", manifest.description));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use slovo_core::models::{ExecutionConfig, ToolSource, ToolStatus};
    use uuid::Uuid;

    fn manifest(name: &str) -> ToolManifest {
        let now = Utc::now();
        ToolManifest {
            id: Uuid::new_v4(),
            name: name.to_string(),
            version: "1.0".to_string(),
            description: "test".to_string(),
            source: ToolSource::Local,
            source_locator: "test".to_string(),
            status: ToolStatus::Approved,
            schema: serde_json::json!({}),
            capabilities: vec![],
            parameters_schema: serde_json::json!({}),
            execution: ExecutionConfig::default(),
            approved_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn intent(text: &str, intent_type: IntentType, requires_tool: bool) -> Intent {
        let mut intent = Intent::new(intent_type, text);
        intent.requires_tool = requires_tool;
        intent
    }

    #[tokio::test]
    async fn plain_question_plans_retrieval_then_response() {
        let planner = PlannerAgent::new(None);
        let plan = planner
            .create_plan(&intent("what is rust", IntentType::Question, false), None)
            .await;

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].step_type, StepType::MemoryRetrieval);
        assert_eq!(plan.steps[1].step_type, StepType::LlmResponse);
        assert_eq!(plan.steps[1].depends_on, vec![0]);
        assert!(plan.requires_verification);
    }

    #[tokio::test]
    async fn known_tool_hint_plans_tool_execution() {
        let planner = PlannerAgent::new(None);
        planner.register_tool(manifest("weather"));

        let mut request = intent("search the weather", IntentType::Command, true);
        request.tool_hint = Some("weather".to_string());

        let plan = planner.create_plan(&request, None).await;
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[1].step_type, StepType::ToolExecution);
        assert_eq!(plan.steps[1].tool_name.as_deref(), Some("weather"));
        // Final response depends on every predecessor.
        assert_eq!(plan.steps[2].depends_on, vec![0, 1]);
    }

    #[tokio::test]
    async fn missing_tool_plans_discovery() {
        let planner = PlannerAgent::new(None);
        let plan = planner
            .create_plan(
                &intent("search for flights", IntentType::Command, true),
                None,
            )
            .await;

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[1].step_type, StepType::ToolDiscovery);
        assert_eq!(plan.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn unknown_intent_plans_clarification() {
        let planner = PlannerAgent::new(None);
        let plan = planner
            .create_plan(&intent("", IntentType::Unknown, false), None)
            .await;

        assert!(plan.needs_clarification());
    }

    #[tokio::test]
    async fn unregistering_removes_tool() {
        let planner = PlannerAgent::new(None);
        planner.register_tool(manifest("weather"));
        assert!(planner.has_tool("weather"));
        planner.unregister_tool("weather");
        assert!(!planner.has_tool("weather"));
    }
}
