//! `ContextStep`: reuse or refresh the `.ma/context/` snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::step::{Step, StepOutcome};
use crate::workflow::WorkflowContext;

pub struct ContextStep;

impl ContextStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ContextStep {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_paths(workspace: &Path) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
    let base = workspace.join(".ma").join("context");
    (
        base.join("snapshot.json"),
        base.join("summary.md"),
        base.join("files.ndjson"),
    )
}

/// Walk `dir`, skipping `.git`/`.ma`, the only source-scanning behavior this
/// step needs (the content-aware repo scan itself lives outside this
/// orchestrator).
fn walk_source_files(dir: &Path, out: &mut Vec<std::fs::DirEntry>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name == ".git" || name == ".ma" {
            continue;
        }
        if let Ok(file_type) = entry.file_type() {
            if file_type.is_dir() {
                walk_source_files(&entry.path(), out);
            } else if file_type.is_file() {
                out.push(entry);
            }
        }
    }
}

fn newest_source_mtime(workspace: &Path) -> Option<SystemTime> {
    let mut files = Vec::new();
    walk_source_files(workspace, &mut files);
    files
        .into_iter()
        .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()))
        .max()
}

fn scan_summary(workspace: &Path) -> (u64, u64) {
    let mut files = Vec::new();
    walk_source_files(workspace, &mut files);
    let bytes = files.iter().filter_map(|e| e.metadata().ok()).map(|m| m.len()).sum();
    (files.len() as u64, bytes)
}

#[async_trait]
impl Step for ContextStep {
    fn name(&self) -> &str {
        "context"
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        let workspace_path = ctx
            .get("workspace_path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let workspace = Path::new(&workspace_path);
        let force_rescan = config.get("forceRescan").and_then(Value::as_bool).unwrap_or(false);

        let (snapshot_path, summary_path, files_ndjson_path) = snapshot_paths(workspace);

        let can_reuse = !force_rescan
            && snapshot_path.exists()
            && summary_path.exists()
            && files_ndjson_path.exists()
            && snapshot_path
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|snapshot_mtime| {
                    newest_source_mtime(workspace).map(|newest| newest <= snapshot_mtime)
                })
                .unwrap_or(false);

        let mut result = HashMap::new();
        result.insert("reused_existing".to_string(), json!(can_reuse));
        result.insert(
            "snapshotPath".to_string(),
            json!(snapshot_path.strip_prefix(workspace).unwrap_or(&snapshot_path).display().to_string()),
        );
        result.insert(
            "summaryPath".to_string(),
            json!(summary_path.strip_prefix(workspace).unwrap_or(&summary_path).display().to_string()),
        );
        result.insert(
            "filesNdjsonPath".to_string(),
            json!(files_ndjson_path.strip_prefix(workspace).unwrap_or(&files_ndjson_path).display().to_string()),
        );

        if can_reuse {
            result.insert("totals".to_string(), json!({}));
            return Ok(StepOutcome::success(result));
        }

        let (files, bytes) = scan_summary(workspace);
        if let Some(parent) = snapshot_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::MeridianError::Integrity(format!("failed to create .ma/context: {e}"))
            })?;
        }
        let totals = json!({"files": files, "bytes": bytes});
        std::fs::write(&snapshot_path, serde_json::to_vec_pretty(&totals).unwrap_or_default()).ok();
        std::fs::write(&summary_path, format!("# Context summary\n\n{files} files, {bytes} bytes\n")).ok();
        std::fs::write(&files_ndjson_path, "").ok();

        result.insert("totals".to_string(), totals);
        Ok(StepOutcome::success(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rescans_when_no_snapshot_exists() {
        let dir = tempdir().unwrap();
        let step = ContextStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let outcome = step.execute(&json!({}), &ctx).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.result.get("reused_existing"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn reuses_existing_snapshot_when_fresh() {
        let dir = tempdir().unwrap();
        let step = ContextStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        step.execute(&json!({}), &ctx).await.unwrap();
        let outcome = step.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(outcome.result.get("reused_existing"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn force_rescan_always_rescans() {
        let dir = tempdir().unwrap();
        let step = ContextStep::new();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        step.execute(&json!({}), &ctx).await.unwrap();
        let outcome = step.execute(&json!({"forceRescan": true}), &ctx).await.unwrap();
        assert_eq!(outcome.result.get("reused_existing"), Some(&json!(false)));
    }
}
