//! Verifier agent.
//!
//! Judges an execution result for validity and confidence, accumulating
//! issues and suggestions, and decides whether the orchestrator should
//! retry with a correction. The heuristic path scores multiplicatively
//! from observable failure signals.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use slovo_core::llm::{generate_structured, LanguageModel, LlmMessage};
use slovo_core::models::{ExecutionResult, Verification};

const VERIFIER_SYSTEM_PROMPT: &str = "You are a verification system for a voice assistant called Slovo.
Your job is to validate execution results and ensure quality, accuracy, and safety.

You must evaluate:
1. Accuracy - Is the response factually correct?
2. Completeness - Does it fully address the user's request?
3. Relevance - Is it relevant to what was asked?
4. Safety - Is there any harmful or inappropriate content?

Scoring guidelines:
- 0.9-1.0: Excellent, no issues
- 0.7-0.9: Good, minor issues
- 0.5-0.7: Acceptable, some issues
- 0.3-0.5: Poor, significant issues
- 0.0-0.3: Unacceptable, critical issues

Be honest about uncertainty. If you cannot verify something, say so.";

const VERIFICATION_SCHEMA: &str = r#"{
  "is_valid": true,
  "confidence": 0.0,
  "issues": [{"description": "string", "suggestion": "string or null"}],
  "requires_correction": false,
  "correction_strategy": "string or null"
}"#;

#[derive(Debug, Deserialize)]
struct ReportedIssue {
    description: String,
    #[serde(default)]
    suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerificationAnalysis {
    is_valid: bool,
    confidence: f64,
    #[serde(default)]
    issues: Vec<ReportedIssue>,
    #[serde(default)]
    requires_correction: bool,
    #[serde(default)]
    correction_strategy: Option<String>,
}

pub struct VerifierAgent {
    llm: Option<Arc<dyn LanguageModel>>,
}

impl VerifierAgent {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>) -> Self {
        info!(has_llm = llm.is_some(), "Verifier agent initialized");
        Self { llm }
    }

    pub async fn verify(
        &self,
        result: &ExecutionResult,
        original_request: Option<&str>,
    ) -> Verification {
        debug!(success = result.success, "Verifying execution result");

        // The model only judges completed results with output; failures
        // are scored heuristically either way.
        if result.success && result.final_output.is_some() {
            if let Some(llm) = &self.llm {
                match self.llm_verify(llm.as_ref(), result, original_request).await {
                    Ok(verification) => return verification,
                    Err(e) => warn!("Model verification failed, using heuristics: {e}"),
                }
            }
        }

        heuristic_verify(result)
    }

    async fn llm_verify(
        &self,
        llm: &dyn LanguageModel,
        result: &ExecutionResult,
        original_request: Option<&str>,
    ) -> Result<Verification, slovo_core::llm::LlmError> {
        let request_text = original_request.unwrap_or(&result.plan.intent.text);
        let output = result.final_text().unwrap_or_default();

        let user_content = format!(
            "Verify this assistant response:\n\n\
             Original request: \"{request_text}\"\n\n\
             Response to verify:\n{output}\n\n\
             Execution steps completed:\n{}\n\n\
             Please assess the quality, accuracy, and completeness of this response.",
            format_steps(result),
        );
        let messages = vec![LlmMessage::user(user_content)];

        let analysis: VerificationAnalysis =
            generate_structured(llm, &messages, VERIFIER_SYSTEM_PROMPT, VERIFICATION_SCHEMA)
                .await?;

        let issues: Vec<String> = analysis
            .issues
            .iter()
            .map(|issue| issue.description.clone())
            .collect();
        let mut suggestions: Vec<String> = analysis
            .issues
            .iter()
            .filter_map(|issue| issue.suggestion.clone())
            .collect();
        if analysis.requires_correction {
            if let Some(strategy) = &analysis.correction_strategy {
                suggestions.insert(0, strategy.clone());
            }
        }

        debug!(
            is_valid = analysis.is_valid,
            confidence = analysis.confidence,
            "Verification analysis complete"
        );

        Ok(Verification {
            is_valid: analysis.is_valid,
            confidence: analysis.confidence.clamp(0.0, 1.0),
            issues,
            suggestions,
            requires_correction: analysis.requires_correction,
            correction_hint: analysis.correction_strategy,
        })
    }
}

/// Score an execution result from observable signals:
/// overall failure x0.3, each failed step x0.5, missing output x0.7,
/// short output x0.8. Correction is required below 0.5 confidence or on
/// any accumulated issue.
fn heuristic_verify(result: &ExecutionResult) -> Verification {
    debug!("Using heuristic verification (no LLM)");

    let mut issues: Vec<String> = Vec::new();
    let mut suggestions: Vec<String> = Vec::new();
    let mut confidence: f64 = 1.0;

    if !result.success {
        issues.push("Execution failed".to_string());
        confidence *= 0.3;
        if let Some(error) = &result.error {
            suggestions.push(format!("Address error: {error}"));
        }
    }

    for step_result in &result.step_results {
        if !step_result.success {
            issues.push(format!(
                "Step {} failed: {}",
                step_result.step_index,
                step_result.error.as_deref().unwrap_or("unknown error")
            ));
            confidence *= 0.5;
        }
    }

    if result.final_output.is_none() && result.success {
        issues.push("No output generated".to_string());
        confidence *= 0.7;
        suggestions.push("Ensure the response step produces output".to_string());
    }

    if let Some(output) = result.final_text() {
        if output.len() < 10 {
            issues.push("Response seems too short".to_string());
            confidence *= 0.8;
        }
    }

    let requires_correction = confidence < 0.5 || !issues.is_empty();

    Verification {
        is_valid: issues.is_empty(),
        confidence,
        correction_hint: suggestions.first().cloned(),
        issues,
        suggestions,
        requires_correction,
    }
}

fn format_steps(result: &ExecutionResult) -> String {
    result
        .plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let status = result
                .step_results
                .get(i)
                .map(|r| if r.success { "ok" } else { "failed" })
                .unwrap_or("skipped");
            format!(
                "[{status}] Step {i}: {} - {}",
                step.step_type.as_str(),
                step.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use slovo_core::models::{
        ExecutionPlan, Intent, IntentType, PlanStep, StepResult, StepType,
    };

    fn result_with(
        success: bool,
        step_results: Vec<StepResult>,
        final_output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> ExecutionResult {
        let plan = ExecutionPlan::new(
            Intent::new(IntentType::Question, "what is rust?"),
            vec![PlanStep::new(StepType::LlmResponse, "respond")],
        );
        ExecutionResult {
            plan,
            success,
            step_results,
            final_output,
            error,
        }
    }

    #[tokio::test]
    async fn clean_result_scores_full_confidence() {
        let verifier = VerifierAgent::new(None);
        let result = result_with(
            true,
            vec![StepResult::ok(0, serde_json::json!("a perfectly good answer"))],
            Some(serde_json::json!("a perfectly good answer")),
            None,
        );

        let verification = verifier.verify(&result, None).await;
        assert!(verification.is_valid);
        assert_eq!(verification.confidence, 1.0);
        assert!(!verification.requires_correction);
    }

    #[tokio::test]
    async fn overall_failure_multiplies_confidence_down() {
        let verifier = VerifierAgent::new(None);
        let result = result_with(
            false,
            vec![StepResult::failed(0, "boom")],
            None,
            Some("boom".to_string()),
        );

        let verification = verifier.verify(&result, None).await;
        assert!(!verification.is_valid);
        // 1.0 * 0.3 (failure) * 0.5 (failed step) = 0.15
        assert!((verification.confidence - 0.15).abs() < 1e-9);
        assert!(verification.requires_correction);
        assert_eq!(verification.correction_hint.as_deref(), Some("Address error: boom"));
    }

    #[tokio::test]
    async fn missing_output_on_success_costs_confidence() {
        let verifier = VerifierAgent::new(None);
        let result = result_with(true, vec![], None, None);

        let verification = verifier.verify(&result, None).await;
        assert!((verification.confidence - 0.7).abs() < 1e-9);
        assert!(verification.requires_correction);
    }

    #[tokio::test]
    async fn short_output_costs_confidence() {
        let verifier = VerifierAgent::new(None);
        let result = result_with(
            true,
            vec![StepResult::ok(0, serde_json::json!("ok"))],
            Some(serde_json::json!("ok")),
            None,
        );

        let verification = verifier.verify(&result, None).await;
        assert!((verification.confidence - 0.8).abs() < 1e-9);
        assert!(verification.issues.iter().any(|i| i.contains("too short")));
    }
}
