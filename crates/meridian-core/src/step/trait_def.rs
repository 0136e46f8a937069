//! The object-safe `Step` trait every step library entry implements.

use async_trait::async_trait;
use serde_json::Value;

use super::types::StepOutcome;
use crate::error::Result;
use crate::workflow::WorkflowContext;

/// One executable unit in a workflow DAG. Implementations are registered
/// by name in a [`super::StepRegistry`] and looked up by each
/// [`crate::workflow::spec::StepSpec::step_type`].
#[async_trait]
pub trait Step: Send + Sync {
    /// The `type` string steps reference from YAML (`"context"`,
    /// `"persona_request"`, `"git_artifact"`, ...).
    fn name(&self) -> &str;

    /// Type-check the step's already-template-rendered config before the
    /// workflow starts running. Called during validation, never during
    /// execution.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Run the step once against the rendered config and current context.
    /// Retries, timeouts, and output wiring are the engine's job, not the
    /// step's.
    async fn execute(&self, config: &Value, ctx: &WorkflowContext) -> Result<StepOutcome>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Step) {}
};
