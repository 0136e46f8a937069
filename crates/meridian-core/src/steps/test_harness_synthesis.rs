//! `TestHarnessSynthesisStep`: if the repo has no runnable test command,
//! synthesize a critical-priority follow-up task with a language-appropriate
//! remediation plan.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::step::{Step, StepOutcome};
use crate::workflow::WorkflowContext;

pub struct TestHarnessSynthesisStep;

impl TestHarnessSynthesisStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TestHarnessSynthesisStep {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_language(workspace: &Path) -> &'static str {
    if workspace.join("package.json").exists() {
        "javascript"
    } else if workspace.join("pyproject.toml").exists() || workspace.join("setup.cfg").exists() {
        "python"
    } else if workspace.join("go.mod").exists() {
        "go"
    } else if workspace.join("Cargo.toml").exists() {
        "rust"
    } else {
        "unknown"
    }
}

fn remediation_plan(language: &str) -> (String, String) {
    match language {
        "javascript" => (
            "Set up a Vitest test harness".to_string(),
            "Add vitest as a dev dependency, create a `vitest.config.ts`, and add a `test` script to package.json."
                .to_string(),
        ),
        "python" => (
            "Set up a pytest test harness".to_string(),
            "Add pytest to the project's dev dependencies and create an initial `tests/` package with a smoke test."
                .to_string(),
        ),
        "go" => (
            "Set up go test coverage".to_string(),
            "Add `_test.go` files alongside the packages that need coverage; `go test ./...` already works once they exist."
                .to_string(),
        ),
        "rust" => (
            "Set up cargo test coverage".to_string(),
            "Add `#[cfg(test)]` modules to the crates under src/ so `cargo test` has something to run.".to_string(),
        ),
        _ => (
            "Set up a test harness".to_string(),
            "No recognized build manifest was found; choose a test framework appropriate to the project's language."
                .to_string(),
        ),
    }
}

#[async_trait]
impl Step for TestHarnessSynthesisStep {
    fn name(&self) -> &str {
        "test_harness_synthesis"
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        let workspace_path = ctx.get("workspace_path").and_then(Value::as_str).unwrap_or(".").to_string();
        let workspace = Path::new(&workspace_path);

        let test_command_found = ctx
            .get("test_command_discovery")
            .and_then(|v| v.get("found"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut result = HashMap::new();
        if test_command_found {
            result.insert("synthesized".to_string(), json!(false));
            return Ok(StepOutcome::success(result));
        }

        let language = detect_language(workspace);
        let (title, description) = remediation_plan(language);

        result.insert("synthesized".to_string(), json!(true));
        result.insert(
            "follow_up_task".to_string(),
            json!({
                "title": title,
                "description": description,
                "priority": "critical",
                "labels": ["test-harness"],
            }),
        );
        Ok(StepOutcome::success(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn no_synthesis_when_command_already_found() {
        let dir = tempdir().unwrap();
        let step = TestHarnessSynthesisStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        ctx.set("test_command_discovery", json!({"found": true, "command": "cargo test"}));
        let outcome = step.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(outcome.result.get("synthesized"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn synthesizes_rust_plan_when_cargo_toml_present_but_no_command() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let step = TestHarnessSynthesisStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        ctx.set("test_command_discovery", json!({"found": false}));
        let outcome = step.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(outcome.result.get("synthesized"), Some(&json!(true)));
        let follow_up = outcome.result.get("follow_up_task").unwrap();
        assert_eq!(follow_up.get("priority"), Some(&json!("critical")));
        assert!(follow_up.get("title").unwrap().as_str().unwrap().contains("cargo test"));
    }
}
