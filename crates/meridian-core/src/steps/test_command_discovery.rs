//! `TestCommandDiscoveryStep`: figure out how to run this repo's tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{MeridianError, Result};
use crate::step::{Step, StepOutcome};
use crate::workflow::WorkflowContext;

pub struct TestCommandDiscoveryStep;

impl TestCommandDiscoveryStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TestCommandDiscoveryStep {
    fn default() -> Self {
        Self::new()
    }
}

const PACKAGE_JSON_SCRIPT_PRIORITY: &[&str] = &["test:ci", "test", "test:unit"];

fn discover(workspace: &Path, context_request: Option<&Value>) -> Option<String> {
    if let Some(cmd) = context_request.and_then(|v| v.get("test_command")).and_then(Value::as_str) {
        return Some(cmd.to_string());
    }

    let package_json = workspace.join("package.json");
    if let Ok(contents) = std::fs::read_to_string(&package_json) {
        if let Ok(parsed) = serde_json::from_str::<Value>(&contents) {
            if let Some(scripts) = parsed.get("scripts").and_then(Value::as_object) {
                for candidate in PACKAGE_JSON_SCRIPT_PRIORITY {
                    if scripts.contains_key(*candidate) {
                        return Some(format!("npm run {candidate}"));
                    }
                }
            }
        }
    }

    if workspace.join("pyproject.toml").exists() || workspace.join("tox.ini").exists() {
        return Some("tox".to_string());
    }
    if workspace.join("pytest.ini").exists() || workspace.join("setup.cfg").exists() {
        return Some("pytest".to_string());
    }
    if workspace.join("Cargo.toml").exists() {
        return Some("cargo test".to_string());
    }
    if workspace.join("go.mod").exists() {
        return Some("go test ./...".to_string());
    }
    if let Ok(makefile) = std::fs::read_to_string(workspace.join("Makefile")) {
        if makefile.lines().any(|l| l.trim_start().starts_with("test:")) {
            return Some("make test".to_string());
        }
    }

    None
}

#[async_trait]
impl Step for TestCommandDiscoveryStep {
    fn name(&self) -> &str {
        "test_command_discovery"
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        let workspace_path = ctx.get("workspace_path").and_then(Value::as_str).unwrap_or(".").to_string();
        let workspace = Path::new(&workspace_path);
        let require_command = config.get("require_command").and_then(Value::as_bool).unwrap_or(false);
        let context_request = config.get("context_request");

        let command = discover(workspace, context_request);

        let mut result = HashMap::new();
        match command {
            Some(cmd) => {
                result.insert("command".to_string(), json!(cmd));
                result.insert("found".to_string(), json!(true));
                Ok(StepOutcome::success(result))
            }
            None if require_command => Err(MeridianError::Validation {
                step: self.name().to_string(),
                reason: "no test command could be discovered and require_command is set".to_string(),
            }),
            None => {
                result.insert("found".to_string(), json!(false));
                Ok(StepOutcome::success(result))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn discovers_cargo_test() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let step = TestCommandDiscoveryStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let outcome = step.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(outcome.result.get("command"), Some(&json!("cargo test")));
    }

    #[tokio::test]
    async fn context_request_override_wins() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let step = TestCommandDiscoveryStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let outcome = step
            .execute(&json!({"context_request": {"test_command": "custom test"}}), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.result.get("command"), Some(&json!("custom test")));
    }

    #[tokio::test]
    async fn require_command_fails_when_none_found() {
        let dir = tempdir().unwrap();
        let step = TestCommandDiscoveryStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let result = step.execute(&json!({"require_command": true}), &ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn package_json_scripts_priority_order() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"test": "jest", "test:ci": "jest --ci"}}"#,
        )
        .unwrap();
        let step = TestCommandDiscoveryStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let outcome = step.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(outcome.result.get("command"), Some(&json!("npm run test:ci")));
    }
}
