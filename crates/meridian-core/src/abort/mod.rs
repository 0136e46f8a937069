//! Workflow abort and cleanup (§4.9).
//!
//! Invoked once the engine has decided a workflow is aborting: writes a
//! diagnostic snapshot, scans the request stream for every entry belonging
//! to the workflow and removes it, and marks the context idempotently
//! aborted.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::transport::Transport;
use crate::workflow::WorkflowContext;

const DELETE_BATCH_SIZE: usize = 50;
const SCAN_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, serde::Serialize)]
pub struct DiagnosticSnapshot {
    pub workflow_id: String,
    pub failure_reason: String,
    pub completed_steps: Vec<String>,
    pub context: HashMap<String, Value>,
}

/// Build the diagnostic snapshot persisted alongside the abort record.
pub fn build_diagnostic_snapshot(
    workflow_id: &str,
    failure_reason: &str,
    completed_steps: &[String],
    ctx: &WorkflowContext,
) -> DiagnosticSnapshot {
    DiagnosticSnapshot {
        workflow_id: workflow_id.to_string(),
        failure_reason: failure_reason.to_string(),
        completed_steps: completed_steps.to_vec(),
        context: ctx.as_map().clone(),
    }
}

/// Remove every entry on `stream` belonging to `workflow_id`: ack it for
/// every known consumer group, then delete in batches of
/// [`DELETE_BATCH_SIZE`]. The scan itself is bounded to
/// [`SCAN_BATCH_SIZE`] entries per `range` call.
pub async fn purge_workflow_entries(
    transport: &dyn Transport,
    stream: &str,
    groups: &[String],
    workflow_id: &str,
) -> Result<usize> {
    let mut to_delete = Vec::new();
    let mut cursor = "-".to_string();

    loop {
        let entries = transport.range(stream, &cursor, "+", SCAN_BATCH_SIZE).await?;
        if entries.is_empty() {
            break;
        }

        let last_id = entries.last().map(|e| e.id.clone());
        for entry in &entries {
            if entry.fields.get("workflow_id").map(String::as_str) == Some(workflow_id) {
                for group in groups {
                    if let Err(e) = transport.ack(stream, group, &entry.id).await {
                        warn!(entry_id = %entry.id, group = %group, error = %e, "failed to ack during abort cleanup");
                    }
                }
                to_delete.push(entry.id.clone());
            }
        }

        if entries.len() < SCAN_BATCH_SIZE {
            break;
        }
        cursor = format!("({})", last_id.unwrap_or(cursor));
    }

    let count = to_delete.len();
    for chunk in to_delete.chunks(DELETE_BATCH_SIZE) {
        transport.del(stream, chunk).await?;
    }

    info!(stream = %stream, workflow_id = %workflow_id, count, "purged workflow entries on abort");
    Ok(count)
}

/// Mark the context aborted, idempotently. Returns `false` if the workflow
/// was already marked aborted (a second abort call is a no-op).
pub fn mark_aborted(ctx: &mut WorkflowContext) -> bool {
    ctx.mark_aborted()
}

/// Record that the abort was triggered by a push failure rather than a
/// logic failure, so the coordinator can distinguish infrastructure from
/// application errors.
pub fn record_push_failure(ctx: &mut WorkflowContext, branch: &str, detail: &str) {
    ctx.push_failure = Some(serde_json::json!({"branch": branch, "detail": detail}));
}
