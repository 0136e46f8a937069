//! `SubWorkflowStep`: runs a named child workflow to completion against a
//! whitelisted subset of the parent context, then exposes its declared
//! outputs back to the parent. The only step that recurses into
//! [`crate::workflow::run_workflow`] — everything else the engine runs
//! once, at the top level, from the coordinator.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{MeridianError, Result};
use crate::step::{Step, StepOutcome, StepRegistry};
use crate::workflow::{run_workflow, EngineConfig, ResolvedWorkflow, WorkflowContext, WorkflowOutcome};

/// Recurses into another [`ResolvedWorkflow`] by name. Holds a weak
/// reference to the registry it's itself registered in, bound once after
/// the registry's `Arc` exists — the registry can't be handed to its own
/// members' constructors before it's built.
pub struct SubWorkflowStep {
    workflows: HashMap<String, ResolvedWorkflow>,
    registry: OnceLock<Weak<StepRegistry>>,
    engine_config: EngineConfig,
}

impl SubWorkflowStep {
    pub fn new(workflows: HashMap<String, ResolvedWorkflow>) -> Self {
        Self {
            workflows,
            registry: OnceLock::new(),
            engine_config: EngineConfig::default(),
        }
    }

    /// Bind the registry this step was registered into. Must be called
    /// once, before any workflow referencing a `sub_workflow` step runs —
    /// see [`crate::steps::build_default_registry`], which uses
    /// `Arc::new_cyclic` to supply this at construction time.
    pub fn bind_registry(&self, registry: Weak<StepRegistry>) {
        let _ = self.registry.set(registry);
    }
}

#[async_trait]
impl Step for SubWorkflowStep {
    fn name(&self) -> &str {
        "sub_workflow"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let Some(workflow_name) = config.get("workflow").and_then(Value::as_str) else {
            return Err(MeridianError::Config(
                "sub_workflow step requires `workflow`".to_string(),
            ));
        };
        if !self.workflows.contains_key(workflow_name) {
            return Err(MeridianError::Config(format!(
                "sub_workflow step references unknown workflow {workflow_name:?}"
            )));
        }
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        self.validate_config(config)?;

        let workflow_name = config.get("workflow").and_then(Value::as_str).unwrap_or_default();
        let workflow = self.workflows.get(workflow_name).ok_or_else(|| {
            MeridianError::Config(format!("sub_workflow step references unknown workflow {workflow_name:?}"))
        })?;

        let inherit: Vec<String> = config
            .get("inherit")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let outputs_decl: Vec<String> = config
            .get("outputs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let registry = self
            .registry
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| MeridianError::Integrity("sub_workflow step registry not bound".to_string()))?;

        let mut child_ctx = WorkflowContext::with_inputs(ctx.inherit_subset(&inherit));
        let outcome = run_workflow(
            workflow,
            &mut child_ctx,
            &registry,
            &self.engine_config,
            tokio_util::sync::CancellationToken::new(),
        )
        .await?;

        match outcome {
            WorkflowOutcome::Completed => {
                let mut result = HashMap::new();
                for key in &outputs_decl {
                    if let Some(value) = child_ctx.get(key) {
                        result.insert(key.clone(), value.clone());
                    }
                }
                Ok(StepOutcome::success(result))
            }
            WorkflowOutcome::Aborted { reason } => {
                let mut result = HashMap::new();
                result.insert("error".to_string(), Value::String(reason));
                Ok(StepOutcome::failure_abort(result))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowSpec;
    use serde_json::json;

    fn child_workflow() -> ResolvedWorkflow {
        let yaml = r#"
name: child
steps:
  - name: only
    type: context
"#;
        WorkflowSpec::from_yaml(yaml).unwrap().resolve().unwrap()
    }

    #[test]
    fn validate_config_rejects_unknown_workflow() {
        let step = SubWorkflowStep::new(HashMap::from([("child".to_string(), child_workflow())]));
        assert!(step.validate_config(&json!({"workflow": "ghost"})).is_err());
        assert!(step.validate_config(&json!({"workflow": "child"})).is_ok());
    }

    #[tokio::test]
    async fn execute_fails_cleanly_when_registry_unbound() {
        let step = SubWorkflowStep::new(HashMap::from([("child".to_string(), child_workflow())]));
        let ctx = WorkflowContext::new();
        let err = step.execute(&json!({"workflow": "child"}), &ctx).await.unwrap_err();
        assert!(matches!(err, MeridianError::Integrity(_)));
    }

    #[tokio::test]
    async fn execute_runs_child_workflow_and_exposes_outputs() {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(crate::steps::context::ContextStep::new()));
        let sub_workflow = Arc::new(SubWorkflowStep::new(HashMap::from([("child".to_string(), child_workflow())])));
        registry.register(sub_workflow.clone());
        let registry = Arc::new(registry);
        sub_workflow.bind_registry(Arc::downgrade(&registry));

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = WorkflowContext::new();
        ctx.set("workspace_path", json!(dir.path().display().to_string()));
        let outcome = sub_workflow
            .execute(&json!({"workflow": "child", "inherit": ["workspace_path"], "outputs": ["only"]}), &ctx)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.result.contains_key("only"));
    }
}
