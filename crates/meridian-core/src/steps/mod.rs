//! Concrete step implementations (§4.8), registered by `step_type` name
//! into a [`crate::step::StepRegistry`].

pub mod analysis_task_builder;
pub mod context;
pub mod dependency_status;
pub mod diff_apply;
pub mod git_artifact;
pub mod persona_request;
pub mod sub_workflow;
pub mod test_command_discovery;
pub mod test_harness_synthesis;

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatcher::DispatcherConfig;
use crate::step::StepRegistry;
use crate::transport::Transport;
use crate::workflow::ResolvedWorkflow;

/// Build a registry with every step in this module registered under its
/// canonical `step_type` name. `sub_workflows` are the named workflows a
/// `sub_workflow` step may invoke by name.
///
/// Built with `Arc::new_cyclic` because `SubWorkflowStep` needs a handle
/// back to the very registry it's a member of, to look up the steps of
/// whatever child workflow it recurses into.
pub fn build_default_registry(
    transport: Arc<dyn Transport>,
    dispatcher_config: DispatcherConfig,
    sub_workflows: HashMap<String, ResolvedWorkflow>,
) -> Arc<StepRegistry> {
    Arc::new_cyclic(|weak| {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(context::ContextStep::new()));
        registry.register(Arc::new(test_command_discovery::TestCommandDiscoveryStep::new()));
        registry.register(Arc::new(test_harness_synthesis::TestHarnessSynthesisStep::new()));
        registry.register(Arc::new(dependency_status::DependencyStatusStep::new()));
        registry.register(Arc::new(git_artifact::GitArtifactStep::new()));
        registry.register(Arc::new(diff_apply::DiffApplyStep::new()));
        registry.register(Arc::new(analysis_task_builder::AnalysisTaskBuilderStep::new()));
        registry.register(Arc::new(persona_request::PersonaRequestStep::new(transport, dispatcher_config)));

        let sub_workflow_step = sub_workflow::SubWorkflowStep::new(sub_workflows);
        sub_workflow_step.bind_registry(weak.clone());
        registry.register(Arc::new(sub_workflow_step));

        registry
    })
}
