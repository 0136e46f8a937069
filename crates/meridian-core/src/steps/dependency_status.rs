//! `DependencyStatusStep`: classify a task's blocked-dependency list by
//! current status.
//!
//! Fetching the dependency tasks themselves is the dashboard client's job
//! (out of scope for the step library); this step consumes whatever
//! dependency task snapshots the workflow already has in context under
//! `dependency_tasks` (an array of `{id, status}`-shaped objects, typically
//! populated from `${task.blocked_dependencies}` resolved against a task
//! list fetched earlier in the run).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{MeridianError, Result};
use crate::step::{Step, StepOutcome};
use crate::workflow::WorkflowContext;

pub struct DependencyStatusStep;

impl DependencyStatusStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DependencyStatusStep {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct DependencyTask {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

const RESOLVED_STATUSES: &[&str] = &["done", "completed", "closed", "merged"];

fn is_resolved(status: Option<&str>) -> bool {
    status
        .map(|s| RESOLVED_STATUSES.contains(&s.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl Step for DependencyStatusStep {
    fn name(&self) -> &str {
        "dependency_status"
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        let raw = config
            .get("dependency_tasks")
            .or_else(|| ctx.get("dependency_tasks"))
            .cloned()
            .unwrap_or_else(|| json!([]));

        let tasks: Vec<DependencyTask> = serde_json::from_value(raw).map_err(|e| MeridianError::Validation {
            step: self.name().to_string(),
            reason: format!("dependency_tasks must be an array of {{id, status}}: {e}"),
        })?;

        let mut resolved = Vec::new();
        let mut pending = Vec::new();
        for task in &tasks {
            if is_resolved(task.status.as_deref()) {
                resolved.push(task.id.clone());
            } else {
                pending.push(task.id.clone());
            }
        }

        let mut result = HashMap::new();
        let all_resolved = pending.is_empty();
        result.insert("resolved".to_string(), json!(resolved));
        result.insert("pending".to_string(), json!(pending));
        result.insert("allResolved".to_string(), json!(all_resolved));
        Ok(StepOutcome::success(result))
    }
}
