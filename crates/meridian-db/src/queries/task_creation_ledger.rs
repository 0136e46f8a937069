//! Database query functions for the `task_creation_ledger` table.
//!
//! Backs the idempotency scheme described for bulk task creation: every
//! follow-up task is keyed by a deterministic
//! `external_id = "<workflow_run_id>:<step_id>:<index>"`. This table lets a
//! re-run recognize an `external_id` it already created even across a
//! process restart, where the in-memory duplicate-suppression tables have
//! been lost.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TaskCreationLedgerEntry;

/// Record that `external_id` produced `dashboard_task_id`.
///
/// Idempotent: inserting the same `external_id` twice is a no-op and
/// returns the originally-recorded entry.
pub async fn record_created(
    pool: &PgPool,
    external_id: &str,
    workflow_run_id: Uuid,
    dashboard_task_id: &str,
) -> Result<TaskCreationLedgerEntry> {
    let row = sqlx::query_as::<_, TaskCreationLedgerEntry>(
        "INSERT INTO task_creation_ledger (external_id, workflow_run_id, dashboard_task_id) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id \
         RETURNING *",
    )
    .bind(external_id)
    .bind(workflow_run_id)
    .bind(dashboard_task_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to record task creation ledger entry {external_id}"))?;
    Ok(row)
}

/// Look up a prior creation by its deterministic `external_id`.
pub async fn find_by_external_id(
    pool: &PgPool,
    external_id: &str,
) -> Result<Option<TaskCreationLedgerEntry>> {
    let row = sqlx::query_as::<_, TaskCreationLedgerEntry>(
        "SELECT * FROM task_creation_ledger WHERE external_id = $1",
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to look up task creation ledger entry {external_id}"))?;
    Ok(row)
}
