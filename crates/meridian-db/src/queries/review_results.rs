//! Database query functions for the `review_results` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ReviewResult, ReviewStatus};

/// Parameters for recording a review step's normalized outcome.
#[derive(Debug, Clone)]
pub struct NewReviewResult {
    pub workflow_run_id: Uuid,
    pub review_type: String,
    pub status: ReviewStatus,
    pub blocking_issue_count: i32,
    pub raw_payload: Value,
}

/// Record a review step's outcome.
pub async fn record_result(pool: &PgPool, new: &NewReviewResult) -> Result<ReviewResult> {
    let row = sqlx::query_as::<_, ReviewResult>(
        "INSERT INTO review_results \
            (workflow_run_id, review_type, status, blocking_issue_count, raw_payload) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.workflow_run_id)
    .bind(&new.review_type)
    .bind(new.status)
    .bind(new.blocking_issue_count)
    .bind(&new.raw_payload)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to record {} review result for run {}",
            new.review_type, new.workflow_run_id
        )
    })?;
    Ok(row)
}

/// List every review result recorded for a workflow run, in order.
pub async fn list_for_run(pool: &PgPool, workflow_run_id: Uuid) -> Result<Vec<ReviewResult>> {
    let rows = sqlx::query_as::<_, ReviewResult>(
        "SELECT * FROM review_results WHERE workflow_run_id = $1 ORDER BY recorded_at ASC",
    )
    .bind(workflow_run_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list review results for run {workflow_run_id}"))?;
    Ok(rows)
}
