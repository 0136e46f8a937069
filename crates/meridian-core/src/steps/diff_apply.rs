//! `DiffApplyStep`: apply a patch to the working tree, accepting either
//! raw unified-diff text or a structured upsert/delete op list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{MeridianError, Result};
use crate::step::{Step, StepOutcome};
use crate::workflow::WorkflowContext;

pub struct DiffApplyStep;

impl DiffApplyStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DiffApplyStep {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OpAction {
    Upsert,
    Delete,
}

#[derive(Debug, Deserialize)]
struct DiffOp {
    action: OpAction,
    path: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StructuredDiff {
    ops: Vec<DiffOp>,
}

enum ParsedPayload {
    Raw(String),
    Structured(StructuredDiff),
}

fn parse_payload(payload: &Value) -> Result<ParsedPayload> {
    if let Some(raw) = payload.as_str() {
        return Ok(ParsedPayload::Raw(raw.to_string()));
    }
    if payload.get("ops").is_some() {
        let structured: StructuredDiff = serde_json::from_value(payload.clone()).map_err(|e| MeridianError::Validation {
            step: "diff_apply".to_string(),
            reason: format!("malformed structured diff payload: {e}"),
        })?;
        return Ok(ParsedPayload::Structured(structured));
    }
    if let Some(diff) = payload.get("diff").and_then(Value::as_str) {
        return Ok(ParsedPayload::Raw(diff.to_string()));
    }
    Err(MeridianError::Validation {
        step: "diff_apply".to_string(),
        reason: "diff payload is neither raw diff text nor a structured op list".to_string(),
    })
}

fn resolve_target(workspace: &Path, relative_path: &str) -> Result<PathBuf> {
    let candidate = workspace.join(relative_path.trim_start_matches('/'));
    let normalized = normalize_lexically(&candidate);
    let normalized_root = normalize_lexically(workspace);
    if !normalized.starts_with(&normalized_root) {
        return Err(MeridianError::PolicyViolation {
            guard: "diff_apply_path".to_string(),
            detail: format!("{relative_path} escapes the working copy"),
        });
    }
    Ok(normalized)
}

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

fn apply_structured(workspace: &Path, structured: &StructuredDiff) -> Result<Vec<String>> {
    let mut changed = Vec::new();
    for op in &structured.ops {
        let target = resolve_target(workspace, &op.path)?;
        match op.action {
            OpAction::Upsert => {
                let content = op.content.clone().ok_or_else(|| MeridianError::Validation {
                    step: "diff_apply".to_string(),
                    reason: format!("upsert op for {} is missing content", op.path),
                })?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| MeridianError::Integrity(format!("failed to create directory: {e}")))?;
                }
                std::fs::write(&target, content)
                    .map_err(|e| MeridianError::Integrity(format!("failed to write {}: {e}", op.path)))?;
            }
            OpAction::Delete => {
                if target.exists() {
                    std::fs::remove_file(&target)
                        .map_err(|e| MeridianError::Integrity(format!("failed to delete {}: {e}", op.path)))?;
                }
            }
        }
        changed.push(op.path.clone());
    }
    Ok(changed)
}

/// Apply a raw unified diff with `patch -p1`, the same external the
/// original persona-generated diffs are meant to run through.
fn apply_raw_diff(workspace: &Path, diff_text: &str) -> Result<Vec<String>> {
    let changed_paths: Vec<String> = diff_text
        .lines()
        .filter_map(|line| line.strip_prefix("+++ b/"))
        .map(str::to_string)
        .collect();

    let mut child = std::process::Command::new("patch")
        .args(["-p1", "--batch", "--forward"])
        .current_dir(workspace)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| MeridianError::Integrity(format!("failed to spawn patch: {e}")))?;

    {
        use std::io::Write;
        let stdin = child.stdin.as_mut().ok_or_else(|| MeridianError::Integrity("patch stdin unavailable".to_string()))?;
        stdin
            .write_all(diff_text.as_bytes())
            .map_err(|e| MeridianError::Integrity(format!("failed to write diff to patch: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| MeridianError::Integrity(format!("patch did not exit cleanly: {e}")))?;
    if !output.status.success() {
        return Err(MeridianError::Integrity(format!(
            "patch failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(changed_paths)
}

#[async_trait]
impl Step for DiffApplyStep {
    fn name(&self) -> &str {
        "diff_apply"
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        let workspace_path = ctx.get("workspace_path").and_then(Value::as_str).unwrap_or(".").to_string();
        let workspace = Path::new(&workspace_path);

        let payload = config.get("diff").cloned().unwrap_or(Value::Null);
        let parsed = parse_payload(&payload)?;

        let changed = match parsed {
            ParsedPayload::Structured(structured) => apply_structured(workspace, &structured)?,
            ParsedPayload::Raw(text) => apply_raw_diff(workspace, &text)?,
        };

        let mut result = HashMap::new();
        result.insert("changedPaths".to_string(), json!(changed));
        Ok(StepOutcome::success(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn structured_upsert_writes_file() {
        let dir = tempdir().unwrap();
        let step = DiffApplyStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let config = json!({
            "diff": {"ops": [{"action": "upsert", "path": "src/lib.rs", "content": "fn x() {}\n"}]}
        });
        let outcome = step.execute(&config, &ctx).await.unwrap();
        assert_eq!(outcome.result.get("changedPaths"), Some(&json!(["src/lib.rs"])));
        assert!(dir.path().join("src/lib.rs").exists());
    }

    #[tokio::test]
    async fn structured_delete_removes_existing_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), "gone soon").unwrap();
        let step = DiffApplyStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let config = json!({"diff": {"ops": [{"action": "delete", "path": "old.txt"}]}});
        step.execute(&config, &ctx).await.unwrap();
        assert!(!dir.path().join("old.txt").exists());
    }

    #[test]
    fn path_escape_is_rejected() {
        let workspace = Path::new("/tmp/workspace");
        let err = resolve_target(workspace, "../../etc/passwd").unwrap_err();
        assert!(matches!(err, MeridianError::PolicyViolation { .. }));
    }

    #[test]
    fn upsert_without_content_is_rejected() {
        let structured = StructuredDiff {
            ops: vec![DiffOp { action: OpAction::Upsert, path: "a.txt".to_string(), content: None }],
        };
        let workspace = std::env::temp_dir();
        let result = apply_structured(&workspace, &structured);
        assert!(result.is_err());
    }
}
