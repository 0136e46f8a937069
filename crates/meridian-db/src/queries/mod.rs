//! Query helpers, one module per table.

pub mod persona_events;
pub mod review_results;
pub mod step_executions;
pub mod task_creation_ledger;
pub mod workflow_runs;
