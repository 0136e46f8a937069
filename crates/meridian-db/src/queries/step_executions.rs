//! Database query functions for the `step_executions` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{StepExecution, StepStatus};

/// Parameters for recording a completed step attempt.
#[derive(Debug, Clone)]
pub struct NewStepExecution {
    pub workflow_run_id: Uuid,
    pub step_name: String,
    pub attempt: i32,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Record a step's terminal outcome for one attempt.
pub async fn record_step(pool: &PgPool, new: &NewStepExecution) -> Result<StepExecution> {
    let row = sqlx::query_as::<_, StepExecution>(
        "INSERT INTO step_executions \
            (workflow_run_id, step_name, attempt, status, output, error, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, now()) \
         RETURNING *",
    )
    .bind(new.workflow_run_id)
    .bind(&new.step_name)
    .bind(new.attempt)
    .bind(new.status)
    .bind(&new.output)
    .bind(&new.error)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to record step execution {} attempt {} for run {}",
            new.step_name, new.attempt, new.workflow_run_id
        )
    })?;

    Ok(row)
}

/// List every recorded step execution for a workflow run, in start order.
///
/// Feeds the diagnostic snapshot (the abort pipeline's completed-step list).
pub async fn list_for_run(pool: &PgPool, workflow_run_id: Uuid) -> Result<Vec<StepExecution>> {
    let rows = sqlx::query_as::<_, StepExecution>(
        "SELECT * FROM step_executions WHERE workflow_run_id = $1 ORDER BY started_at ASC",
    )
    .bind(workflow_run_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list step executions for run {workflow_run_id}"))?;
    Ok(rows)
}
