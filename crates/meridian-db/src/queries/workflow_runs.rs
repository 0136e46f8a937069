//! Database query functions for the `workflow_runs` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{WorkflowRun, WorkflowRunStatus};

/// Parameters for starting a new workflow run.
#[derive(Debug, Clone)]
pub struct NewWorkflowRun {
    pub id: Uuid,
    pub project_id: String,
    pub task_id: Option<String>,
    pub workflow_name: String,
    pub branch: String,
}

/// Record the start of a workflow run.
pub async fn start_run(pool: &PgPool, new: &NewWorkflowRun) -> Result<WorkflowRun> {
    let run = sqlx::query_as::<_, WorkflowRun>(
        "INSERT INTO workflow_runs (id, project_id, task_id, workflow_name, branch, status) \
         VALUES ($1, $2, $3, $4, $5, 'running') \
         RETURNING *",
    )
    .bind(new.id)
    .bind(&new.project_id)
    .bind(&new.task_id)
    .bind(&new.workflow_name)
    .bind(&new.branch)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to start workflow run {}", new.id))?;

    Ok(run)
}

/// Mark a workflow run completed.
pub async fn complete_run(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE workflow_runs SET status = 'completed', completed_at = now() WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to complete workflow run {id}"))?;
    Ok(())
}

/// Mark a workflow run aborted with a reason.
pub async fn abort_run(pool: &PgPool, id: Uuid, reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE workflow_runs \
         SET status = 'aborted', abort_reason = $2, completed_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await
    .with_context(|| format!("failed to abort workflow run {id}"))?;
    Ok(())
}

/// Fetch a single workflow run by id.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowRun>> {
    let run = sqlx::query_as::<_, WorkflowRun>("SELECT * FROM workflow_runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch workflow run {id}"))?;
    Ok(run)
}

/// List workflow runs in a given status for a project, most recent first.
pub async fn list_by_status(
    pool: &PgPool,
    project_id: &str,
    status: WorkflowRunStatus,
) -> Result<Vec<WorkflowRun>> {
    let runs = sqlx::query_as::<_, WorkflowRun>(
        "SELECT * FROM workflow_runs \
         WHERE project_id = $1 AND status = $2 \
         ORDER BY started_at DESC",
    )
    .bind(project_id)
    .bind(status)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list {status} workflow runs for project {project_id}"))?;
    Ok(runs)
}
