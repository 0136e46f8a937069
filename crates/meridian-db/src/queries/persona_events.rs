//! Database query functions for the `persona_events` table.
//!
//! This is an append-only audit trail of dispatcher traffic, distinct from
//! the transport itself (`meridian_core::transport`); it exists so a
//! diagnostic snapshot or a restarted process can reconstruct what was sent
//! and received for a given workflow run.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{EventDirection, PersonaEvent};

/// Parameters for recording one observed persona message.
#[derive(Debug, Clone)]
pub struct NewPersonaEvent {
    pub workflow_run_id: Uuid,
    pub step: String,
    pub persona: String,
    pub corr_id: String,
    pub direction: EventDirection,
    pub status: Option<String>,
    pub payload: Value,
}

/// Append one persona request or response to the audit trail.
pub async fn record_event(pool: &PgPool, new: &NewPersonaEvent) -> Result<PersonaEvent> {
    let row = sqlx::query_as::<_, PersonaEvent>(
        "INSERT INTO persona_events \
            (workflow_run_id, step, persona, corr_id, direction, status, payload) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.workflow_run_id)
    .bind(&new.step)
    .bind(&new.persona)
    .bind(&new.corr_id)
    .bind(new.direction)
    .bind(&new.status)
    .bind(&new.payload)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to record persona event corr_id={} for run {}",
            new.corr_id, new.workflow_run_id
        )
    })?;
    Ok(row)
}

/// List every event recorded for a given correlation id, in the order
/// observed. Used to detect whether a `corr_id` already has an outstanding
/// request when rebuilding dispatcher state after a restart.
pub async fn list_for_corr_id(
    pool: &PgPool,
    workflow_run_id: Uuid,
    corr_id: &str,
) -> Result<Vec<PersonaEvent>> {
    let rows = sqlx::query_as::<_, PersonaEvent>(
        "SELECT * FROM persona_events \
         WHERE workflow_run_id = $1 AND corr_id = $2 \
         ORDER BY recorded_at ASC",
    )
    .bind(workflow_run_id)
    .bind(corr_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list persona events for corr_id {corr_id}"))?;
    Ok(rows)
}
