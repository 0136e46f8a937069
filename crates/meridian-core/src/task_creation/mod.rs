//! Follow-up task creation pipeline: priority scoring, duplicate detection,
//! idempotent `external_id` assignment, and retrying dashboard writes.

pub mod duplicate;
pub mod priority;

use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dashboard::{DashboardClient, DashboardTask, NewTask};
use crate::error::{MeridianError, Result};
use duplicate::{find_duplicate, DuplicateStrategy};
use priority::{normalize_labels, normalize_title, priority_score, route_milestone, Priority};

/// A follow-up task candidate as proposed by a PM decision, before priority
/// scoring, milestone routing, or duplicate detection have been applied.
#[derive(Debug, Clone)]
pub struct FollowUpCandidate {
    pub title: String,
    pub description: String,
    pub raw_priority: String,
    pub labels: Vec<String>,
    pub deferred: bool,
}

#[derive(Debug, Clone)]
pub struct CreationOutcome {
    pub created: Vec<DashboardTask>,
    pub skipped_as_duplicate: Vec<String>,
}

const RETRY_DELAYS_MS: &[u64] = &[1_000, 2_000, 4_000];

/// Create follow-up tasks for one review-failure's worth of candidates.
///
/// `external_id` for candidate `i` is `<workflow_run_id>:<step_id>:<i>`,
/// checked against the ledger before any dashboard call so a workflow re-run
/// after a crash never double-creates a task.
pub async fn create_follow_up_tasks(
    pool: &PgPool,
    dashboard: &dyn DashboardClient,
    project_id: &str,
    workflow_run_id: Uuid,
    step_id: &str,
    review_type: &str,
    parent_task_title: &str,
    parent_milestone_id: Option<&str>,
    backlog_milestone_id: &str,
    candidates: &[FollowUpCandidate],
    open_tasks: &[DashboardTask],
) -> Result<CreationOutcome> {
    let mut created = Vec::new();
    let mut skipped = Vec::new();
    let mut known_tasks: Vec<DashboardTask> = open_tasks.to_vec();

    for (index, candidate) in candidates.iter().enumerate() {
        let external_id = format!("{workflow_run_id}:{step_id}:{index}");

        if let Some(existing) = meridian_db::queries::task_creation_ledger::find_by_external_id(
            pool,
            &external_id,
        )
        .await
        .map_err(|e| MeridianError::External(format!("ledger lookup failed: {e}")))?
        {
            info!(external_id = %external_id, dashboard_task_id = %existing.dashboard_task_id, "follow-up task already created, skipping");
            skipped.push(external_id);
            continue;
        }

        let priority = Priority::normalize(&candidate.raw_priority);
        let title = normalize_title(
            &candidate.title,
            Some(review_type),
            priority,
            candidate.deferred,
            parent_task_title,
        );
        let score = priority_score(priority, review_type, &title);
        let (milestone_id, warning) = route_milestone(priority, parent_milestone_id, backlog_milestone_id);
        if let Some(w) = warning {
            warn!(%w, title = %title, "milestone routing fallback");
        }
        let labels = normalize_labels(&candidate.labels, review_type, priority);

        let milestone_slug_of = |t: &DashboardTask| t.milestone_id.clone();
        if let Some(dup) = find_duplicate(
            DuplicateStrategy::Title,
            &title,
            &candidate.description,
            Some(&milestone_id),
            &external_id,
            &known_tasks,
            milestone_slug_of,
        )
        .or_else(|| {
            find_duplicate(
                DuplicateStrategy::TitleAndMilestone,
                &title,
                &candidate.description,
                Some(&milestone_id),
                &external_id,
                &known_tasks,
                milestone_slug_of,
            )
        })
        .or_else(|| {
            find_duplicate(
                DuplicateStrategy::ContentHash,
                &title,
                &candidate.description,
                Some(&milestone_id),
                &external_id,
                &known_tasks,
                milestone_slug_of,
            )
        }) {
            info!(title = %title, existing_id = %dup.id, "duplicate follow-up task detected, skipping");
            skipped.push(external_id);
            continue;
        }

        let new_task = NewTask {
            title,
            description: candidate.description.clone(),
            priority_score: score,
            milestone_id: Some(milestone_id),
            labels,
            assignee: priority::FORCED_ASSIGNEE.to_string(),
            external_id: external_id.clone(),
        };

        match create_with_retry(dashboard, project_id, &new_task).await {
            Ok(task) => {
                meridian_db::queries::task_creation_ledger::record_created(
                    pool,
                    &external_id,
                    workflow_run_id,
                    &task.id,
                )
                .await
                .map_err(|e| MeridianError::External(format!("ledger record failed: {e}")))?;
                known_tasks.push(task.clone());
                created.push(task);
            }
            Err(e) => {
                if created.is_empty() {
                    return Err(MeridianError::External(format!(
                        "task creation failed for all candidates, first error: {e}"
                    )));
                }
                return Err(MeridianError::External(format!(
                    "partial_task_creation_failure: {} of {} candidates created before error: {e}",
                    created.len(),
                    candidates.len()
                )));
            }
        }
    }

    Ok(CreationOutcome {
        created,
        skipped_as_duplicate: skipped,
    })
}

async fn create_with_retry(
    dashboard: &dyn DashboardClient,
    project_id: &str,
    task: &NewTask,
) -> Result<DashboardTask> {
    let mut last_err = None;
    for (attempt, delay_ms) in std::iter::once(&0).chain(RETRY_DELAYS_MS.iter()).enumerate() {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }
        match dashboard.create_task(project_id, task).await {
            Ok(created) => return Ok(created),
            Err(e) => {
                warn!(attempt, external_id = %task.external_id, error = %e, "task creation attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| MeridianError::External("task creation exhausted retries".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_are_exponential() {
        assert_eq!(RETRY_DELAYS_MS, &[1_000, 2_000, 4_000]);
    }

    #[test]
    fn follow_up_candidate_carries_deferred_flag() {
        let c = FollowUpCandidate {
            title: "fix it".to_string(),
            description: "".to_string(),
            raw_priority: "high".to_string(),
            labels: vec![],
            deferred: true,
        };
        assert!(c.deferred);
    }
}
