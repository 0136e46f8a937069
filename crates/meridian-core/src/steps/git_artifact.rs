//! `GitArtifactStep`: render an upstream step's output to a file under
//! `.ma/`, commit it, push best-effort, and confirm the branch didn't
//! drift out from under us.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{MeridianError, Result};
use crate::step::{Step, StepOutcome};
use crate::worktree::WorktreeManager;
use crate::workflow::WorkflowContext;

pub struct GitArtifactStep;

impl GitArtifactStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitArtifactStep {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `source_output` (optionally dotted into a nested field) against
/// context, rendering templates along the way.
fn resolve_source(ctx: &WorkflowContext, source_output: &str, field: Option<&str>) -> Option<Value> {
    let rendered = ctx.render(&Value::String(format!("${{{source_output}}}")));
    match field {
        Some(f) => rendered.get(f).cloned(),
        None => Some(rendered),
    }
}

fn format_artifact(value: &Value, format: &str) -> String {
    match format {
        "json" => serde_json::to_string_pretty(value).unwrap_or_default(),
        _ => match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        },
    }
}

/// Resolve `relative_path` under `.ma/`, refusing any attempt to escape it.
fn resolve_artifact_path(workspace: &Path, relative_path: &str) -> Result<PathBuf> {
    let ma_root = workspace.join(".ma");
    let candidate = ma_root.join(relative_path.trim_start_matches('/'));
    let normalized = normalize_lexically(&candidate);
    let normalized_root = normalize_lexically(&ma_root);
    if !normalized.starts_with(&normalized_root) {
        return Err(MeridianError::PolicyViolation {
            guard: "git_artifact_path".to_string(),
            detail: format!("{relative_path} escapes .ma/"),
        });
    }
    Ok(normalized)
}

/// Lexical `..`/`.` resolution without touching the filesystem (the path
/// may not exist yet).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl Step for GitArtifactStep {
    fn name(&self) -> &str {
        "git_artifact"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        for required in ["source_output", "path", "commit_message"] {
            if config.get(required).is_none() {
                return Err(MeridianError::Config(format!(
                    "git_artifact step requires `{required}`"
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        self.validate_config(config)?;

        let workspace_path = ctx.get("workspace_path").and_then(Value::as_str).unwrap_or(".").to_string();
        let workspace = Path::new(&workspace_path);
        let expected_branch = ctx.get("branch").and_then(Value::as_str).map(str::to_string);

        let source_output = config.get("source_output").and_then(Value::as_str).unwrap_or_default();
        let field = config.get("field").and_then(Value::as_str);
        let relative_path = config.get("path").and_then(Value::as_str).unwrap_or_default();
        let commit_message = config
            .get("commit_message")
            .map(|v| ctx.render(v))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "Update generated artifact".to_string());
        let format = config.get("format").and_then(Value::as_str).unwrap_or("markdown");

        let value = resolve_source(ctx, source_output, field).ok_or_else(|| MeridianError::Validation {
            step: self.name().to_string(),
            reason: format!("source_output `{source_output}` resolved to nothing"),
        })?;

        let artifact_path = resolve_artifact_path(workspace, relative_path)?;
        if let Some(parent) = artifact_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MeridianError::Integrity(format!("failed to create artifact directory: {e}")))?;
        }
        let rendered = format_artifact(&value, format);
        std::fs::write(&artifact_path, &rendered)
            .map_err(|e| MeridianError::Integrity(format!("failed to write artifact: {e}")))?;

        let manager = WorktreeManager::new(workspace, None)
            .map_err(|e| MeridianError::Integrity(format!("workspace is not a git worktree: {e}")))?;

        if let Some(expected) = &expected_branch {
            let actual = manager
                .current_branch(workspace)
                .map_err(|e| MeridianError::Integrity(format!("failed to read current branch: {e}")))?;
            if &actual != expected {
                return Err(MeridianError::Integrity(format!(
                    "branch drifted: expected {expected}, found {actual}"
                )));
            }
        }

        manager
            .commit_all(workspace, &commit_message)
            .map_err(|e| MeridianError::Integrity(format!("failed to commit artifact: {e}")))?;

        let mut pushed = true;
        if let Some(branch) = &expected_branch {
            if let Err(e) = manager.push(branch) {
                tracing::warn!(error = %e, "git_artifact push failed, continuing best-effort");
                pushed = false;
            }
        }

        let mut result = HashMap::new();
        result.insert(
            "artifactPath".to_string(),
            json!(artifact_path.strip_prefix(workspace).unwrap_or(&artifact_path).display().to_string()),
        );
        result.insert("pushed".to_string(), json!(pushed));
        Ok(StepOutcome::success(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_escape_is_rejected() {
        let workspace = Path::new("/tmp/workspace");
        let err = resolve_artifact_path(workspace, "../../etc/passwd").unwrap_err();
        assert!(matches!(err, MeridianError::PolicyViolation { .. }));
    }

    #[test]
    fn nested_path_under_ma_is_allowed() {
        let workspace = Path::new("/tmp/workspace");
        let resolved = resolve_artifact_path(workspace, "review/summary.md").unwrap();
        assert_eq!(resolved, workspace.join(".ma").join("review").join("summary.md"));
    }

    #[test]
    fn json_format_pretty_prints() {
        let value = json!({"a": 1});
        let formatted = format_artifact(&value, "json");
        assert!(formatted.contains("\"a\""));
    }

    #[test]
    fn markdown_format_uses_raw_string_when_value_is_string() {
        let value = Value::String("# heading".to_string());
        let formatted = format_artifact(&value, "markdown");
        assert_eq!(formatted, "# heading");
    }
}
