//! Review-failure sub-workflow (§4.6): invoked whenever a review step
//! reports `fail` or `unknown`. Normalizes the failure, asks the
//! project-manager persona to decide, routes/creates follow-up tasks, and
//! registers them as blocking dependencies on the parent task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::dashboard::{DashboardClient, DashboardTask};
use crate::dispatcher::{request, DispatchRequest, DispatcherConfig};
use crate::error::{MeridianError, Result};
use crate::task_creation::{create_follow_up_tasks, FollowUpCandidate};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingIssue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_true")]
    pub blocking: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedReviewFailure {
    pub review_type: String,
    pub blocking_issues: Vec<BlockingIssue>,
    pub has_blocking_issues: bool,
}

/// Stage 1: map a persona's free-form review result into the canonical
/// shape. Missing/malformed issue entries are dropped with a warning
/// rather than failing the whole normalization.
pub fn normalize_review_failure(review_type: &str, review_result: &Value) -> NormalizedReviewFailure {
    let issues: Vec<BlockingIssue> = review_result
        .get("blocking_issues")
        .or_else(|| review_result.get("issues"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| match serde_json::from_value::<BlockingIssue>(v.clone()) {
                    Ok(issue) => Some(issue),
                    Err(e) => {
                        warn!(error = %e, "dropping malformed blocking issue");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let has_blocking_issues = issues.iter().any(|i| i.blocking);

    NormalizedReviewFailure {
        review_type: review_type.to_string(),
        blocking_issues: issues,
        has_blocking_issues,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PmDecisionKind {
    ImmediateFix,
    Defer,
}

#[derive(Debug, Clone)]
pub struct RawFollowUp {
    pub title: String,
    pub description: String,
    pub priority: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PmDecision {
    pub kind: PmDecisionKind,
    pub follow_up_tasks: Vec<RawFollowUp>,
    pub warnings: Vec<String>,
}

/// Stage 3: parse and normalize the PM persona's decision payload.
/// Unrecognized `decision` values default to `defer`; `immediate_fix` with
/// no follow-ups is downgraded to `defer` with a recorded warning.
pub fn parse_pm_decision(payload: &Value) -> PmDecision {
    let mut warnings = Vec::new();

    let raw_decision = payload.get("decision").and_then(Value::as_str).unwrap_or("defer");
    let mut kind = match raw_decision {
        "immediate_fix" => PmDecisionKind::ImmediateFix,
        "defer" => PmDecisionKind::Defer,
        other => {
            warnings.push(format!("unrecognized PM decision {other:?}, defaulting to defer"));
            PmDecisionKind::Defer
        }
    };

    let follow_up_tasks: Vec<RawFollowUp> = payload
        .get("follow_up_tasks")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    let title = v.get("title").and_then(Value::as_str)?.to_string();
                    Some(RawFollowUp {
                        title,
                        description: v
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        priority: v
                            .get("priority")
                            .and_then(Value::as_str)
                            .unwrap_or("medium")
                            .to_string(),
                        labels: v
                            .get("labels")
                            .and_then(Value::as_array)
                            .map(|l| l.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if kind == PmDecisionKind::ImmediateFix && follow_up_tasks.is_empty() {
        warnings.push("immediate_fix decision had no follow_up_tasks, downgrading to defer".to_string());
        kind = PmDecisionKind::Defer;
    }

    PmDecision {
        kind,
        follow_up_tasks,
        warnings,
    }
}

/// Stage 5: merge auto-synthesized follow-ups with the PM's, dropping
/// entries with no title.
pub fn merge_follow_ups(pm_follow_ups: Vec<RawFollowUp>, auto_follow_ups: Vec<RawFollowUp>) -> Vec<RawFollowUp> {
    pm_follow_ups
        .into_iter()
        .chain(auto_follow_ups)
        .filter(|f| {
            if f.title.trim().is_empty() {
                warn!("dropping follow-up with empty title");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Stage 6: synthesize one follow-up per blocking issue not already
/// addressed by an existing follow-up (matched by substring of the issue
/// title inside a follow-up title).
pub fn synthesize_coverage_follow_ups(
    normalized: &NormalizedReviewFailure,
    existing: &[RawFollowUp],
) -> Vec<RawFollowUp> {
    normalized
        .blocking_issues
        .iter()
        .filter(|issue| issue.blocking)
        .filter(|issue| {
            !existing
                .iter()
                .any(|f| f.title.to_lowercase().contains(&issue.title.to_lowercase()))
        })
        .map(|issue| RawFollowUp {
            title: issue.title.clone(),
            description: issue.description.clone(),
            priority: issue.severity.clone(),
            labels: issue.labels.clone(),
        })
        .collect()
}

/// Whether the coverage check (stage 6) should abort the sub-workflow: QA
/// reported missing test infrastructure but nothing in the follow-up set
/// addresses it.
pub fn qa_test_infra_gap(normalized: &NormalizedReviewFailure, follow_ups: &[RawFollowUp]) -> bool {
    if normalized.review_type != "qa" {
        return false;
    }
    let reported_missing_infra = normalized
        .blocking_issues
        .iter()
        .any(|i| i.description.to_lowercase().contains("test infrastructure missing"));
    if !reported_missing_infra {
        return false;
    }
    !follow_ups.iter().any(|f| {
        f.title.to_lowercase().contains("test") || f.description.to_lowercase().contains("test")
    })
}

pub struct ReviewFailureInputs<'a> {
    pub review_type: &'a str,
    pub review_result: Value,
    pub task: &'a DashboardTask,
    pub parent_milestone_id: Option<&'a str>,
    pub backlog_milestone_id: &'a str,
}

pub struct ReviewFailureOutcome {
    pub created_task_ids: Vec<String>,
    pub warnings: Vec<String>,
}

/// Run the full 8-stage sub-workflow for one review failure.
#[allow(clippy::too_many_arguments)]
pub async fn handle_review_failure(
    inputs: ReviewFailureInputs<'_>,
    transport: &dyn crate::transport::Transport,
    dispatcher_config: &DispatcherConfig,
    dashboard: &dyn DashboardClient,
    pool: &PgPool,
    project_id: &str,
    workflow_run_id: Uuid,
    step_id: &str,
    open_tasks: &[DashboardTask],
    cancel: CancellationToken,
) -> Result<ReviewFailureOutcome> {
    let normalized = normalize_review_failure(inputs.review_type, &inputs.review_result);

    let pm_payload = serde_json::json!({
        "review_type": normalized.review_type,
        "blocking_issues": normalized.blocking_issues,
        "task_title": inputs.task.title,
    });

    let dispatch_req = DispatchRequest {
        workflow_id: workflow_run_id.to_string(),
        step: step_id.to_string(),
        persona: "project-manager".to_string(),
        intent: "pm_review_decision".to_string(),
        payload: pm_payload,
        timeout_ms: 60_000,
        deadline_s: 300,
        project_id: Some(project_id.to_string()),
        repo: None,
        branch: None,
        task_id: Some(inputs.task.id.clone()),
    };

    let pm_response = request(transport, dispatcher_config, dispatch_req, &[], cancel)
        .await
        .map_err(|f| MeridianError::Persona {
            persona: "project-manager".to_string(),
            message: f.reason,
        })?;

    let decision = parse_pm_decision(&pm_response.status.payload);
    let mut warnings = decision.warnings.clone();

    let pm_follow_ups = decision.follow_up_tasks;
    let merged = merge_follow_ups(pm_follow_ups, Vec::new());
    let coverage_additions = synthesize_coverage_follow_ups(&normalized, &merged);
    let all_follow_ups = merge_follow_ups(merged, coverage_additions);

    if qa_test_infra_gap(&normalized, &all_follow_ups) {
        return Err(MeridianError::Integrity(
            "PM decision ignored QA test failure".to_string(),
        ));
    }

    let candidates: Vec<FollowUpCandidate> = all_follow_ups
        .into_iter()
        .map(|f| FollowUpCandidate {
            title: f.title,
            description: f.description,
            raw_priority: f.priority,
            labels: f.labels,
            deferred: decision.kind == PmDecisionKind::Defer,
        })
        .collect();

    let creation = create_follow_up_tasks(
        pool,
        dashboard,
        project_id,
        workflow_run_id,
        step_id,
        inputs.review_type,
        &inputs.task.title,
        inputs.parent_milestone_id,
        inputs.backlog_milestone_id,
        &candidates,
        open_tasks,
    )
    .await?;

    let created_task_ids: Vec<String> = creation.created.iter().map(|t| t.id.clone()).collect();

    if !created_task_ids.is_empty() {
        let lock_version = inputs.task.lock_version.unwrap_or(0);
        let mut blocked = inputs.task.blocked_dependencies.clone();
        blocked.extend(created_task_ids.iter().cloned());
        dashboard
            .patch_task(
                project_id,
                &inputs.task.id,
                &crate::dashboard::TaskPatch {
                    status: None,
                    blocked_dependencies: Some(blocked),
                    lock_version,
                },
            )
            .await?;
    }

    warnings.extend(creation.skipped_as_duplicate.iter().map(|id| format!("skipped duplicate {id}")));

    Ok(ReviewFailureOutcome {
        created_task_ids,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_drops_malformed_issues() {
        let result = json!({"blocking_issues": [{"id": "1"}, {"id":"2","title":"t","description":"d","severity":"high"}]});
        let normalized = normalize_review_failure("qa", &result);
        assert_eq!(normalized.blocking_issues.len(), 1);
    }

    #[test]
    fn unrecognized_decision_defaults_to_defer() {
        let decision = parse_pm_decision(&json!({"decision": "bogus"}));
        assert_eq!(decision.kind, PmDecisionKind::Defer);
        assert!(!decision.warnings.is_empty());
    }

    #[test]
    fn immediate_fix_without_follow_ups_downgrades() {
        let decision = parse_pm_decision(&json!({"decision": "immediate_fix"}));
        assert_eq!(decision.kind, PmDecisionKind::Defer);
    }

    #[test]
    fn merge_drops_empty_titles() {
        let f1 = RawFollowUp {
            title: "".to_string(),
            description: "".to_string(),
            priority: "low".to_string(),
            labels: vec![],
        };
        let f2 = RawFollowUp {
            title: "real".to_string(),
            description: "".to_string(),
            priority: "low".to_string(),
            labels: vec![],
        };
        let merged = merge_follow_ups(vec![f1, f2], vec![]);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn qa_test_infra_gap_detected_when_no_test_follow_up() {
        let normalized = NormalizedReviewFailure {
            review_type: "qa".to_string(),
            blocking_issues: vec![BlockingIssue {
                id: "1".to_string(),
                title: "no tests".to_string(),
                description: "test infrastructure missing entirely".to_string(),
                severity: "critical".to_string(),
                labels: vec![],
                blocking: true,
            }],
            has_blocking_issues: true,
        };
        assert!(qa_test_infra_gap(&normalized, &[]));
    }
}
