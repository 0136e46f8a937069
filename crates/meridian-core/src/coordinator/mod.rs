//! The coordinator loop: one iteration moves a single task through
//! `IDLE -> SELECTING -> PREPARING_BRANCH -> RUNNING -> ADVANCING`, then
//! loops back to `SELECTING` until no tasks remain or an iteration cap is
//! hit.

pub mod branch;

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dashboard::{DashboardClient, DashboardTask, TaskPatch};
use crate::dispatcher::DispatcherConfig;
use crate::error::{MeridianError, Result};
use crate::isolation::Isolation;
use crate::review_failure::{self, ReviewFailureInputs};
use crate::state::CoordinatorState;
use crate::step::StepRegistry;
use crate::task_creation::priority::Priority;
use crate::transport::Transport;
use crate::workflow::{run_workflow, EngineConfig, ResolvedWorkflow, WorkflowContext, WorkflowOutcome};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub project_id: String,
    pub project_slug: String,
    pub base_branch: String,
    pub max_iterations: u32,
    pub backlog_milestone_id: String,
    /// When set, only tasks already `in_progress` are selected and no new
    /// task is picked up once none remain — a graceful drain before a
    /// restart, as opposed to a fresh `open`/`pending`/`backlog` pickup.
    pub drain_only: bool,
}

#[derive(Debug, Clone)]
pub enum CoordinatorOutcome {
    /// No selectable tasks remained.
    Done { iterations: u32 },
    /// A task's workflow aborted.
    Aborted { task_id: String, reason: String },
    /// The configured iteration cap was reached before exhaustion.
    IterationCapReached { iterations: u32 },
    /// Cancelled externally (drain / interrupt).
    Interrupted { iterations: u32 },
}

/// Rank used as the tiebreaker when `priority_score` is absent or tied,
/// highest first.
fn status_priority(status: Option<&str>) -> i32 {
    match status {
        Some("open") => 3,
        Some("pending") | None => 2,
        Some("backlog") => 1,
        Some(_) => 0,
    }
}

/// Select the next task to run: open tasks sorted by
/// `(priority_score desc, status_priority desc, position asc)` — `position`
/// is the task's index in the dashboard's returned order, the final
/// deterministic tiebreaker when a dashboard schema lacks `priority_score`
/// and all `status_priority` values tie.
///
/// When `draining` is set, only tasks already `in_progress` are eligible —
/// used to let in-flight work finish without picking up anything new.
pub fn select_next_task(tasks: &[DashboardTask], draining: bool) -> Option<&DashboardTask> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| {
            if draining {
                matches!(t.status.as_deref(), Some("in_progress"))
            } else {
                matches!(
                    t.status.as_deref(),
                    Some("open") | Some("pending") | Some("backlog") | None
                )
            }
        })
        .max_by_key(|(position, t)| {
            (
                t.priority_score.unwrap_or(i64::MIN),
                status_priority(t.status.as_deref()),
                std::cmp::Reverse(*position),
            )
        })
        .map(|(_, t)| t)
}

/// Run the coordinator loop to completion (or until cancelled / capped).
#[allow(clippy::too_many_arguments)]
pub async fn run_coordinator(
    config: &CoordinatorConfig,
    dashboard: &dyn DashboardClient,
    isolation: &dyn Isolation,
    registry: &Arc<StepRegistry>,
    task_flow: &ResolvedWorkflow,
    pool: &PgPool,
    transport: &dyn Transport,
    dispatcher_config: &DispatcherConfig,
    cancel: CancellationToken,
) -> Result<CoordinatorOutcome> {
    let mut state = CoordinatorState::Idle;
    let mut iterations: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(CoordinatorOutcome::Interrupted { iterations });
        }
        if iterations >= config.max_iterations {
            return Ok(CoordinatorOutcome::IterationCapReached { iterations });
        }

        state = advance_to(state, CoordinatorState::Selecting)?;

        let tasks = dashboard.list_tasks(&config.project_id).await?;
        let chosen = select_next_task(&tasks, config.drain_only).cloned();

        let Some(task) = chosen else {
            advance_to(state, CoordinatorState::Done)?;
            return Ok(CoordinatorOutcome::Done { iterations });
        };

        state = advance_to(state, CoordinatorState::PreparingBranch)?;

        let milestones = dashboard.list_milestones(&config.project_id).await?;
        let milestone_slug = task
            .milestone_id
            .as_ref()
            .and_then(|id| milestones.iter().find(|m| &m.id == id))
            .map(|m| m.slug.clone());

        let branch = branch::select_branch(
            None,
            task.slug.as_deref(),
            milestone_slug.as_deref(),
            &config.project_slug,
        );

        let workspace = isolation
            .create_workspace(&branch)
            .await
            .map_err(|e| MeridianError::Integrity(format!("failed to create workspace for {branch}: {e}")))?;
        isolation
            .push(&branch)
            .await
            .map_err(|e| MeridianError::External(format!("failed to push branch {branch}: {e}")))?;

        let lock_version = task.lock_version.unwrap_or(0);
        dashboard
            .patch_task(
                &config.project_id,
                &task.id,
                &TaskPatch {
                    status: Some("in_progress".to_string()),
                    blocked_dependencies: None,
                    lock_version,
                },
            )
            .await?;

        state = advance_to(state, CoordinatorState::Running)?;

        let run_id = Uuid::new_v4();
        meridian_db::queries::workflow_runs::start_run(
            pool,
            &meridian_db::queries::workflow_runs::NewWorkflowRun {
                id: run_id,
                project_id: config.project_id.clone(),
                task_id: Some(task.id.clone()),
                workflow_name: task_flow.name.clone(),
                branch: branch.clone(),
            },
        )
        .await
        .map_err(|e| MeridianError::External(format!("failed to record workflow run: {e}")))?;

        let mut ctx = WorkflowContext::with_inputs(std::collections::HashMap::from([
            ("task".to_string(), serde_json::to_value(&task).unwrap_or_default()),
            ("branch".to_string(), serde_json::Value::String(branch.clone())),
            (
                "workspace_path".to_string(),
                serde_json::Value::String(workspace.path.display().to_string()),
            ),
            ("workflow_id".to_string(), serde_json::Value::String(run_id.to_string())),
            ("project_id".to_string(), serde_json::Value::String(config.project_id.clone())),
        ]));

        let engine_config = EngineConfig::default();
        let outcome = run_workflow(task_flow, &mut ctx, registry, &engine_config, cancel.clone()).await?;

        match outcome {
            WorkflowOutcome::Completed => {
                let review = ctx.get("review").cloned();
                let review_status = review
                    .as_ref()
                    .and_then(|v| v.get("status"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string);

                if matches!(review_status.as_deref(), Some("fail") | Some("unknown")) {
                    let review_result = review.clone().unwrap_or(serde_json::Value::Null);
                    let review_type = review
                        .as_ref()
                        .and_then(|v| v.get("review_type"))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("review")
                        .to_string();

                    let outcome = review_failure::handle_review_failure(
                        ReviewFailureInputs {
                            review_type: &review_type,
                            review_result,
                            task: &task,
                            parent_milestone_id: task.milestone_id.as_deref(),
                            backlog_milestone_id: &config.backlog_milestone_id,
                        },
                        transport,
                        dispatcher_config,
                        dashboard,
                        pool,
                        &config.project_id,
                        run_id,
                        "review",
                        &tasks,
                        cancel.clone(),
                    )
                    .await;

                    match outcome {
                        Ok(outcome) => {
                            dashboard
                                .patch_task(
                                    &config.project_id,
                                    &task.id,
                                    &TaskPatch {
                                        status: Some("open".to_string()),
                                        blocked_dependencies: None,
                                        lock_version: lock_version + 1,
                                    },
                                )
                                .await?;
                            meridian_db::queries::workflow_runs::complete_run(pool, run_id)
                                .await
                                .map_err(|e| MeridianError::External(format!("failed to complete workflow run: {e}")))?;
                            info!(
                                task_id = %task.id,
                                follow_ups = outcome.created_task_ids.len(),
                                "review failure routed to follow-up tasks"
                            );
                            for w in &outcome.warnings {
                                warn!(task_id = %task.id, warning = %w, "review-failure warning");
                            }
                        }
                        Err(e) => {
                            meridian_db::queries::workflow_runs::abort_run(pool, run_id, &e.to_string())
                                .await
                                .map_err(|e| MeridianError::External(format!("failed to record abort: {e}")))?;
                            warn!(task_id = %task.id, error = %e, "review-failure pipeline aborted");
                            advance_to(state, CoordinatorState::Aborted)?;
                            return Ok(CoordinatorOutcome::Aborted {
                                task_id: task.id.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                } else {
                    dashboard
                        .patch_task(
                            &config.project_id,
                            &task.id,
                            &TaskPatch {
                                status: Some("done".to_string()),
                                blocked_dependencies: None,
                                lock_version: lock_version + 1,
                            },
                        )
                        .await?;
                    meridian_db::queries::workflow_runs::complete_run(pool, run_id)
                        .await
                        .map_err(|e| MeridianError::External(format!("failed to complete workflow run: {e}")))?;
                    info!(task_id = %task.id, branch = %branch, "task completed");
                }
                state = advance_to(state, CoordinatorState::Advancing)?;
            }
            WorkflowOutcome::Aborted { reason } => {
                meridian_db::queries::workflow_runs::abort_run(pool, run_id, &reason)
                    .await
                    .map_err(|e| MeridianError::External(format!("failed to record abort: {e}")))?;
                warn!(task_id = %task.id, %reason, "task workflow aborted");
                advance_to(state, CoordinatorState::Aborted)?;
                return Ok(CoordinatorOutcome::Aborted {
                    task_id: task.id.clone(),
                    reason,
                });
            }
        }

        state = advance_to(state, CoordinatorState::Selecting)?;
        iterations += 1;
    }
}

fn advance_to(from: CoordinatorState, to: CoordinatorState) -> Result<CoordinatorState> {
    if !from.is_valid_transition(to) {
        return Err(MeridianError::Integrity(format!(
            "invalid coordinator transition {from} -> {to}"
        )));
    }
    Ok(to)
}

/// Given a review's urgency, decide whether the task being worked should
/// itself be treated as urgent for scheduling purposes (used by tests and
/// by the review-failure pipeline when re-prioritizing the parent task).
pub fn is_urgent_priority(raw_priority: &str) -> bool {
    matches!(Priority::normalize(raw_priority), Priority::Critical | Priority::High)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: Option<&str>, score: Option<i64>) -> DashboardTask {
        DashboardTask {
            id: id.to_string(),
            title: "t".to_string(),
            slug: None,
            status: status.map(String::from),
            priority_score: score,
            milestone_id: None,
            description: None,
            labels: vec![],
            assignee: None,
            external_id: None,
            blocked_dependencies: vec![],
            lock_version: None,
        }
    }

    #[test]
    fn selects_highest_priority_open_task() {
        let tasks = vec![
            task("a", Some("open"), Some(50)),
            task("b", Some("open"), Some(1000)),
            task("c", Some("done"), Some(2000)),
        ];
        let chosen = select_next_task(&tasks, false).unwrap();
        assert_eq!(chosen.id, "b");
    }

    #[test]
    fn ties_broken_by_earlier_position() {
        let tasks = vec![task("a", Some("open"), Some(50)), task("b", Some("open"), Some(50))];
        let chosen = select_next_task(&tasks, false).unwrap();
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn missing_priority_score_falls_back_to_status_priority() {
        let tasks = vec![task("a", Some("backlog"), None), task("b", Some("open"), None)];
        let chosen = select_next_task(&tasks, false).unwrap();
        assert_eq!(chosen.id, "b");
    }

    #[test]
    fn no_open_tasks_returns_none() {
        let tasks = vec![task("a", Some("done"), Some(50))];
        assert!(select_next_task(&tasks, false).is_none());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let result = advance_to(CoordinatorState::Idle, CoordinatorState::Running);
        assert!(result.is_err());
    }
}
