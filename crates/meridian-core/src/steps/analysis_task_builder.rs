//! `AnalysisTaskBuilderStep`: turn an analyst persona's highest-confidence
//! hypothesis into an actionable follow-up task description.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{MeridianError, Result};
use crate::step::{Step, StepOutcome};
use crate::workflow::WorkflowContext;

pub struct AnalysisTaskBuilderStep;

impl AnalysisTaskBuilderStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnalysisTaskBuilderStep {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct Hypothesis {
    summary: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    remediation_steps: Vec<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    validation_plan: Option<String>,
    #[serde(default)]
    key_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnalystPayload {
    hypotheses: Vec<Hypothesis>,
}

fn top_hypothesis(payload: &AnalystPayload) -> Option<&Hypothesis> {
    payload
        .hypotheses
        .iter()
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
}

fn compose_description(hypothesis: &Hypothesis) -> String {
    let mut out = String::new();
    out.push_str(&hypothesis.summary);
    out.push_str("\n\n");

    if !hypothesis.remediation_steps.is_empty() {
        out.push_str("## Steps\n");
        for (i, step) in hypothesis.remediation_steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
        out.push('\n');
    }

    if !hypothesis.acceptance_criteria.is_empty() {
        out.push_str("## Acceptance criteria\n");
        for criterion in &hypothesis.acceptance_criteria {
            out.push_str(&format!("- {criterion}\n"));
        }
        out.push('\n');
    }

    if let Some(plan) = &hypothesis.validation_plan {
        out.push_str("## Validation plan\n");
        out.push_str(plan);
        out.push_str("\n\n");
    }

    if !hypothesis.key_files.is_empty() {
        out.push_str("## Key files\n");
        for file in &hypothesis.key_files {
            out.push_str(&format!("- `{file}`\n"));
        }
    }

    out.trim_end().to_string()
}

#[async_trait]
impl Step for AnalysisTaskBuilderStep {
    fn name(&self) -> &str {
        "analysis_task_builder"
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        let raw = config
            .get("analyst_output")
            .cloned()
            .or_else(|| ctx.get("analyst_output").cloned())
            .ok_or_else(|| MeridianError::Validation {
                step: self.name().to_string(),
                reason: "analyst_output is required".to_string(),
            })?;

        let payload: AnalystPayload = serde_json::from_value(raw).map_err(|e| MeridianError::Validation {
            step: self.name().to_string(),
            reason: format!("malformed analyst payload: {e}"),
        })?;

        let hypothesis = top_hypothesis(&payload).ok_or_else(|| MeridianError::Validation {
            step: self.name().to_string(),
            reason: "analyst payload contained no hypotheses".to_string(),
        })?;

        let description = compose_description(hypothesis);

        let mut result = HashMap::new();
        result.insert(
            "actionable_tasks".to_string(),
            json!([{
                "title": hypothesis.summary,
                "description": description,
                "confidence": hypothesis.confidence,
            }]),
        );
        Ok(StepOutcome::success(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn picks_highest_confidence_hypothesis() {
        let step = AnalysisTaskBuilderStep::new();
        let ctx = WorkflowContext::new();
        let config = json!({
            "analyst_output": {
                "hypotheses": [
                    {"summary": "low confidence", "confidence": 0.2},
                    {"summary": "likely root cause", "confidence": 0.9, "remediation_steps": ["fix it"]},
                ]
            }
        });
        let outcome = step.execute(&config, &ctx).await.unwrap();
        let tasks = outcome.result.get("actionable_tasks").unwrap().as_array().unwrap();
        assert_eq!(tasks[0]["title"], json!("likely root cause"));
        assert!(tasks[0]["description"].as_str().unwrap().contains("fix it"));
    }

    #[tokio::test]
    async fn no_hypotheses_is_an_error() {
        let step = AnalysisTaskBuilderStep::new();
        let ctx = WorkflowContext::new();
        let config = json!({"analyst_output": {"hypotheses": []}});
        let result = step.execute(&config, &ctx).await;
        assert!(result.is_err());
    }

    #[test]
    fn description_includes_all_sections() {
        let hypothesis = Hypothesis {
            summary: "root cause".to_string(),
            confidence: 0.8,
            remediation_steps: vec!["do a".to_string()],
            acceptance_criteria: vec!["a works".to_string()],
            validation_plan: Some("run the suite".to_string()),
            key_files: vec!["src/lib.rs".to_string()],
        };
        let description = compose_description(&hypothesis);
        assert!(description.contains("## Steps"));
        assert!(description.contains("## Acceptance criteria"));
        assert!(description.contains("## Validation plan"));
        assert!(description.contains("## Key files"));
    }
}
