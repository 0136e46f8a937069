//! `PersonaRequestStep`: the primary step type — dispatches a request to a
//! named persona over the transport, interprets the response, and, for
//! review-intent personas, writes the `review` context value the
//! coordinator branches on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dispatcher::status::StatusVerdict;
use crate::dispatcher::{request, DispatchRequest, DispatcherConfig};
use crate::error::{MeridianError, Result};
use crate::step::{Step, StepOutcome};
use crate::transport::Transport;
use crate::workflow::WorkflowContext;

/// Intents whose result is a review verdict the coordinator acts on,
/// rather than a plain generative answer.
const REVIEW_INTENTS: &[&str] = &["qa", "code_review", "security_review", "devops_review"];

pub struct PersonaRequestStep {
    transport: Arc<dyn Transport>,
    dispatcher_config: DispatcherConfig,
}

impl PersonaRequestStep {
    pub fn new(transport: Arc<dyn Transport>, dispatcher_config: DispatcherConfig) -> Self {
        Self {
            transport,
            dispatcher_config,
        }
    }
}

fn verdict_str(verdict: StatusVerdict) -> &'static str {
    match verdict {
        StatusVerdict::Pass => "pass",
        StatusVerdict::Fail => "fail",
        StatusVerdict::Unknown => "unknown",
    }
}

#[async_trait]
impl Step for PersonaRequestStep {
    fn name(&self) -> &str {
        "persona_request"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        for required in ["persona", "intent"] {
            if config.get(required).and_then(Value::as_str).is_none() {
                return Err(MeridianError::Config(format!(
                    "persona_request step requires `{required}`"
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome> {
        self.validate_config(config)?;

        let persona = config.get("persona").and_then(Value::as_str).unwrap_or_default().to_string();
        let intent = config.get("intent").and_then(Value::as_str).unwrap_or_default().to_string();
        let payload = config.get("payload").cloned().unwrap_or_else(|| json!({}));
        let timeout_ms = config.get("timeout_ms").and_then(Value::as_u64).unwrap_or(120_000);
        let deadline_s = config.get("deadline_s").and_then(Value::as_u64).unwrap_or(300);
        let step_name = config.get("step_name").and_then(Value::as_str).unwrap_or(&intent).to_string();

        let workflow_id = ctx.get("workflow_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let task_id = ctx
            .get("task")
            .and_then(|t| t.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let project_id = config
            .get("project_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| ctx.get("project_id").and_then(Value::as_str).map(str::to_string));
        let branch = ctx.get("branch").and_then(Value::as_str).map(str::to_string);

        let changed_files: Vec<String> = ctx
            .get("changed_files")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let dispatch_req = DispatchRequest {
            workflow_id,
            step: step_name,
            persona: persona.clone(),
            intent: intent.clone(),
            payload,
            timeout_ms,
            deadline_s,
            project_id,
            repo: None,
            branch,
            task_id,
        };

        let response = request(
            self.transport.as_ref(),
            &self.dispatcher_config,
            dispatch_req,
            &changed_files,
            tokio_util::sync::CancellationToken::new(),
        )
        .await
        .map_err(|f| MeridianError::Persona {
            persona: persona.clone(),
            message: f.reason,
        })?;

        let mut result = HashMap::new();
        let verdict = verdict_str(response.status.verdict);
        result.insert("status".to_string(), json!(verdict));
        result.insert("details".to_string(), json!(response.status.details));
        result.insert("payload".to_string(), response.status.payload.clone());
        result.insert("corr_id".to_string(), json!(response.corr_id));

        if REVIEW_INTENTS.contains(&intent.as_str()) {
            result.insert(
                "review".to_string(),
                json!({
                    "status": verdict,
                    "review_type": intent,
                    "details": response.status.details,
                    "blocking_issues": response.status.payload.get("blocking_issues")
                        .or_else(|| response.status.payload.get("issues"))
                        .cloned()
                        .unwrap_or(Value::Null),
                }),
            );
        }

        Ok(StepOutcome::success(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn step() -> PersonaRequestStep {
        PersonaRequestStep::new(
            Arc::new(MemoryTransport::new()),
            DispatcherConfig {
                stream_prefix: "test".to_string(),
                persona_policies: HashMap::new(),
            },
        )
    }

    #[test]
    fn validate_config_requires_persona_and_intent() {
        let s = step();
        assert!(s.validate_config(&json!({})).is_err());
        assert!(s.validate_config(&json!({"persona": "qa"})).is_err());
        assert!(s.validate_config(&json!({"persona": "qa", "intent": "qa"})).is_ok());
    }

    #[tokio::test]
    async fn exhausted_dispatch_surfaces_as_persona_error() {
        let s = PersonaRequestStep::new(
            Arc::new(MemoryTransport::new()),
            DispatcherConfig {
                stream_prefix: "test".to_string(),
                persona_policies: HashMap::from([(
                    "qa".to_string(),
                    crate::dispatcher::PersonaPolicy {
                        max_retries: Some(0),
                        retry_backoff_increment_ms: 1,
                    },
                )]),
            },
        );
        let ctx = WorkflowContext::new();
        let config = json!({"persona": "qa", "intent": "qa", "timeout_ms": 10});
        let err = s.execute(&config, &ctx).await.unwrap_err();
        assert!(matches!(err, MeridianError::Persona { .. }));
    }
}
