//! YAML-driven DAG workflow engine: spec parsing/validation, the
//! variable context threaded through a run, and the concurrent executor.

pub mod context;
pub mod engine;
pub mod spec;

pub use context::WorkflowContext;
pub use engine::{EngineConfig, WorkflowOutcome, run_workflow};
pub use spec::{ResolvedWorkflow, StepSpec, WorkflowSpec};
