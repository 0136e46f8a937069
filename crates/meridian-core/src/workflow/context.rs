//! The mutable variable bag threaded through a workflow run.

use std::collections::HashMap;

use serde_json::Value;

use crate::template;

/// Workflow execution state: variables visible to `${...}` templates, plus
/// the bookkeeping the engine needs to decide abort/retry.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    vars: HashMap<String, Value>,
    pub workflow_aborted: bool,
    pub push_failure: Option<Value>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context seeded with the given input variables.
    pub fn with_inputs(inputs: HashMap<String, Value>) -> Self {
        Self {
            vars: inputs,
            workflow_aborted: false,
            push_failure: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.vars
    }

    /// Record a step's outputs: `${step_name.field}` for each declared
    /// output, each output also copied to its own top-level `${field}` key,
    /// plus the canonical `${step_name}_status` marker.
    pub fn record_step_outputs(&mut self, step_name: &str, status: &str, outputs: HashMap<String, Value>) {
        for (key, value) in &outputs {
            self.vars.insert(key.clone(), value.clone());
        }
        self.vars
            .insert(step_name.to_string(), Value::Object(outputs.into_iter().collect()));
        self.vars
            .insert(format!("{step_name}_status"), Value::String(status.to_string()));
    }

    /// Render `value` against the current variables.
    pub fn render(&self, value: &Value) -> Value {
        template::render(value, &self.vars)
    }

    /// Evaluate a condition string against the current variables. An empty
    /// or absent condition is always true (unconditional step).
    pub fn eval_condition(&self, condition: Option<&str>) -> crate::error::Result<bool> {
        match condition {
            None => Ok(true),
            Some(c) if c.trim().is_empty() => Ok(true),
            Some(c) => template::eval_condition(c, &self.vars)
                .map_err(|e| crate::error::MeridianError::Config(format!("invalid condition {c:?}: {e}"))),
        }
    }

    /// Extract a whitelisted subset of variables for a child sub-workflow.
    pub fn inherit_subset(&self, keys: &[String]) -> HashMap<String, Value> {
        keys.iter()
            .filter_map(|k| self.vars.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn mark_aborted(&mut self) -> bool {
        if self.workflow_aborted {
            return false;
        }
        self.workflow_aborted = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_step_outputs_sets_both_object_and_status() {
        let mut ctx = WorkflowContext::new();
        let mut outputs = HashMap::new();
        outputs.insert("snapshotPath".to_string(), json!(".ma/context/snapshot.json"));
        ctx.record_step_outputs("context", "success", outputs);

        assert_eq!(ctx.get("context_status"), Some(&json!("success")));
        assert_eq!(
            ctx.get("context").unwrap()["snapshotPath"],
            json!(".ma/context/snapshot.json")
        );
    }

    #[test]
    fn record_step_outputs_also_flattens_to_top_level_keys() {
        let mut ctx = WorkflowContext::new();
        let mut outputs = HashMap::new();
        outputs.insert("review".to_string(), json!({"status": "pass"}));
        ctx.record_step_outputs("qa_review", "success", outputs);

        assert_eq!(ctx.get("review"), Some(&json!({"status": "pass"})));
        assert_eq!(ctx.get("qa_review").unwrap()["status"], json!("pass"));
    }

    #[test]
    fn mark_aborted_is_idempotent() {
        let mut ctx = WorkflowContext::new();
        assert!(ctx.mark_aborted());
        assert!(!ctx.mark_aborted());
    }

    #[test]
    fn empty_condition_is_unconditional() {
        let ctx = WorkflowContext::new();
        assert!(ctx.eval_condition(None).unwrap());
        assert!(ctx.eval_condition(Some("")).unwrap());
    }

    #[test]
    fn inherit_subset_only_copies_whitelisted_keys() {
        let mut ctx = WorkflowContext::new();
        ctx.set("task", json!({"slug": "x"}));
        ctx.set("secret", json!("do-not-leak"));

        let inherited = ctx.inherit_subset(&["task".to_string()]);
        assert!(inherited.contains_key("task"));
        assert!(!inherited.contains_key("secret"));
    }
}
