//! Reasoning artifacts flowing through the agent pipeline.
//!
//! One request produces an `Intent`, an `ExecutionPlan`, an
//! `ExecutionResult`, a `Verification` and an `Explanation`, in that order.
//! The plan owns its intent and the result owns its plan; the verifier and
//! explainer borrow the result from the per-request task.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a user utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Question,
    Command,
    Conversation,
    ToolRequest,
    Clarification,
    Unknown,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Question => "question",
            IntentType::Command => "command",
            IntentType::Conversation => "conversation",
            IntentType::ToolRequest => "tool_request",
            IntentType::Clarification => "clarification",
            IntentType::Unknown => "unknown",
        }
    }
}

/// Interpreted user intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// Verbatim user text.
    pub text: String,
    /// Primary language code (e.g. "en").
    pub language: String,
    /// Extracted named entities, keyed by entity type.
    #[serde(default)]
    pub entities: HashMap<String, String>,
    pub confidence: f64,
    pub requires_tool: bool,
    pub tool_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(intent_type: IntentType, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_type,
            text: text.into(),
            language: "en".to_string(),
            entities: HashMap::new(),
            confidence: 1.0,
            requires_tool: false,
            tool_hint: None,
            created_at: Utc::now(),
        }
    }
}

/// Operation performed by a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    MemoryRetrieval,
    ToolDiscovery,
    ToolExecution,
    LlmResponse,
    Clarification,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::MemoryRetrieval => "memory_retrieval",
            StepType::ToolDiscovery => "tool_discovery",
            StepType::ToolExecution => "tool_execution",
            StepType::LlmResponse => "llm_response",
            StepType::Clarification => "clarification",
        }
    }
}

/// A single planned step with its prerequisites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub description: String,
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_params: Option<HashMap<String, serde_json::Value>>,
    /// Indices of steps that must complete before this one.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl PlanStep {
    pub fn new(step_type: StepType, description: impl Into<String>) -> Self {
        Self {
            step_type,
            description: description.into(),
            tool_name: None,
            tool_params: None,
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanComplexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Ordered, dependency-annotated plan for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub intent: Intent,
    pub steps: Vec<PlanStep>,
    /// When false the orchestrator skips the verifier stage.
    pub requires_verification: bool,
    /// When false and the executor produced output, the explainer is skipped.
    pub requires_explanation: bool,
    pub complexity: PlanComplexity,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(intent: Intent, steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent,
            steps,
            requires_verification: true,
            requires_explanation: true,
            complexity: PlanComplexity::Simple,
            risk_level: RiskLevel::Low,
            created_at: Utc::now(),
        }
    }

    /// True when any step needs user input before execution can proceed.
    pub fn needs_clarification(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.step_type == StepType::Clarification)
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StepResult {
    pub fn ok(step_index: usize, output: serde_json::Value) -> Self {
        Self {
            step_index,
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(step_index: usize, error: impl Into<String>) -> Self {
        Self {
            step_index,
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of executing a full plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan: ExecutionPlan,
    pub success: bool,
    pub step_results: Vec<StepResult>,
    /// By convention, the last step's output.
    pub final_output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Terminal output rendered as text, when present.
    pub fn final_text(&self) -> Option<String> {
        self.final_output.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Verifier judgement over an execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub is_valid: bool,
    pub confidence: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub requires_correction: bool,
    pub correction_hint: Option<String>,
}

/// User-facing explanation produced by the explainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub response: String,
    pub reasoning: Option<String>,
    pub actions_taken: Vec<String>,
    pub confidence_note: Option<String>,
}

/// Final result of one `process_message` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub response: String,
    pub reasoning: Option<String>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_type_round_trips_through_serde() {
        let json = serde_json::to_string(&IntentType::ToolRequest).unwrap();
        assert_eq!(json, "\"tool_request\"");
        let back: IntentType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, IntentType::ToolRequest);
    }

    #[test]
    fn plan_detects_clarification_steps() {
        let intent = Intent::new(IntentType::Question, "what?");
        let mut plan = ExecutionPlan::new(intent.clone(), vec![]);
        assert!(!plan.needs_clarification());

        plan.steps
            .push(PlanStep::new(StepType::Clarification, "ask the user"));
        assert!(plan.needs_clarification());
    }

    #[test]
    fn final_text_unwraps_json_strings() {
        let intent = Intent::new(IntentType::Conversation, "hi");
        let plan = ExecutionPlan::new(intent, vec![]);
        let result = ExecutionResult {
            plan,
            success: true,
            step_results: vec![],
            final_output: Some(serde_json::json!("hello there")),
            error: None,
        };
        assert_eq!(result.final_text().unwrap(), "hello there");
    }
}
