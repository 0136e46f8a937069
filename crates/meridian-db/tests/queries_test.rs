//! Integration tests for the orchestrator's own bookkeeping tables:
//! workflow runs, step executions, persona traffic, review results, and
//! the task-creation idempotency ledger.

use serde_json::json;
use uuid::Uuid;

use meridian_db::models::{EventDirection, ReviewStatus, StepStatus, WorkflowRunStatus};
use meridian_db::queries::{
    persona_events, review_results, step_executions, task_creation_ledger, workflow_runs,
};

use meridian_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn workflow_run_lifecycle() {
    let (pool, db_name) = create_test_db().await;

    let run = workflow_runs::start_run(
        &pool,
        &workflow_runs::NewWorkflowRun {
            id: Uuid::new_v4(),
            project_id: "proj-1".to_string(),
            task_id: Some("task-1".to_string()),
            workflow_name: "implement".to_string(),
            branch: "task/task-1".to_string(),
        },
    )
    .await
    .expect("start_run should succeed");

    assert_eq!(run.status, WorkflowRunStatus::Running);
    assert!(run.completed_at.is_none());

    let fetched = workflow_runs::get_run(&pool, run.id)
        .await
        .expect("get_run should succeed")
        .expect("run should exist");
    assert_eq!(fetched.id, run.id);
    assert_eq!(fetched.workflow_name, "implement");

    workflow_runs::complete_run(&pool, run.id)
        .await
        .expect("complete_run should succeed");

    let completed = workflow_runs::get_run(&pool, run.id)
        .await
        .expect("get_run should succeed")
        .expect("run should still exist");
    assert_eq!(completed.status, WorkflowRunStatus::Completed);
    assert!(completed.completed_at.is_some());

    let running = workflow_runs::list_by_status(&pool, "proj-1", WorkflowRunStatus::Running)
        .await
        .expect("list_by_status should succeed");
    assert!(running.iter().all(|r| r.id != run.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn workflow_run_abort_records_reason() {
    let (pool, db_name) = create_test_db().await;

    let run = workflow_runs::start_run(
        &pool,
        &workflow_runs::NewWorkflowRun {
            id: Uuid::new_v4(),
            project_id: "proj-1".to_string(),
            task_id: None,
            workflow_name: "review".to_string(),
            branch: "task/task-2".to_string(),
        },
    )
    .await
    .expect("start_run should succeed");

    workflow_runs::abort_run(&pool, run.id, "persona dispatch timed out")
        .await
        .expect("abort_run should succeed");

    let aborted = workflow_runs::get_run(&pool, run.id)
        .await
        .expect("get_run should succeed")
        .expect("run should still exist");
    assert_eq!(aborted.status, WorkflowRunStatus::Aborted);
    assert_eq!(
        aborted.abort_reason.as_deref(),
        Some("persona dispatch timed out")
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn step_executions_accumulate_per_run() {
    let (pool, db_name) = create_test_db().await;

    let run = workflow_runs::start_run(
        &pool,
        &workflow_runs::NewWorkflowRun {
            id: Uuid::new_v4(),
            project_id: "proj-1".to_string(),
            task_id: Some("task-3".to_string()),
            workflow_name: "implement".to_string(),
            branch: "task/task-3".to_string(),
        },
    )
    .await
    .expect("start_run should succeed");

    step_executions::record_step(
        &pool,
        &step_executions::NewStepExecution {
            workflow_run_id: run.id,
            step_name: "implement".to_string(),
            attempt: 1,
            status: StepStatus::Failure,
            output: None,
            error: Some("persona returned malformed diff".to_string()),
        },
    )
    .await
    .expect("record_step should succeed");

    step_executions::record_step(
        &pool,
        &step_executions::NewStepExecution {
            workflow_run_id: run.id,
            step_name: "implement".to_string(),
            attempt: 2,
            status: StepStatus::Success,
            output: Some(json!({"files_changed": 3})),
            error: None,
        },
    )
    .await
    .expect("record_step should succeed");

    let steps = step_executions::list_for_run(&pool, run.id)
        .await
        .expect("list_for_run should succeed");
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].attempt, 1);
    assert_eq!(steps[0].status, StepStatus::Failure);
    assert_eq!(steps[1].attempt, 2);
    assert_eq!(steps[1].status, StepStatus::Success);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn persona_events_roundtrip_by_corr_id() {
    let (pool, db_name) = create_test_db().await;

    let run = workflow_runs::start_run(
        &pool,
        &workflow_runs::NewWorkflowRun {
            id: Uuid::new_v4(),
            project_id: "proj-1".to_string(),
            task_id: Some("task-4".to_string()),
            workflow_name: "implement".to_string(),
            branch: "task/task-4".to_string(),
        },
    )
    .await
    .expect("start_run should succeed");

    let corr_id = Uuid::new_v4().to_string();

    persona_events::record_event(
        &pool,
        &persona_events::NewPersonaEvent {
            workflow_run_id: run.id,
            step: "implement".to_string(),
            persona: "engineer".to_string(),
            corr_id: corr_id.clone(),
            direction: EventDirection::Request,
            status: None,
            payload: json!({"task": "task-4"}),
        },
    )
    .await
    .expect("record_event should succeed");

    persona_events::record_event(
        &pool,
        &persona_events::NewPersonaEvent {
            workflow_run_id: run.id,
            step: "implement".to_string(),
            persona: "engineer".to_string(),
            corr_id: corr_id.clone(),
            direction: EventDirection::Response,
            status: Some("ok".to_string()),
            payload: json!({"diff": "..."}),
        },
    )
    .await
    .expect("record_event should succeed");

    let events = persona_events::list_for_corr_id(&pool, run.id, &corr_id)
        .await
        .expect("list_for_corr_id should succeed");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].direction, EventDirection::Request);
    assert_eq!(events[1].direction, EventDirection::Response);
    assert_eq!(events[1].status.as_deref(), Some("ok"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn review_results_record_and_list() {
    let (pool, db_name) = create_test_db().await;

    let run = workflow_runs::start_run(
        &pool,
        &workflow_runs::NewWorkflowRun {
            id: Uuid::new_v4(),
            project_id: "proj-1".to_string(),
            task_id: Some("task-5".to_string()),
            workflow_name: "review".to_string(),
            branch: "task/task-5".to_string(),
        },
    )
    .await
    .expect("start_run should succeed");

    review_results::record_result(
        &pool,
        &review_results::NewReviewResult {
            workflow_run_id: run.id,
            review_type: "code_review".to_string(),
            status: ReviewStatus::Fail,
            blocking_issue_count: 2,
            raw_payload: json!({"issues": ["missing test", "unused import"]}),
        },
    )
    .await
    .expect("record_result should succeed");

    let results = review_results::list_for_run(&pool, run.id)
        .await
        .expect("list_for_run should succeed");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ReviewStatus::Fail);
    assert_eq!(results[0].blocking_issue_count, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_creation_ledger_is_idempotent() {
    let (pool, db_name) = create_test_db().await;

    let run_id = Uuid::new_v4();
    let external_id = format!("{run_id}:review:0");

    let first = task_creation_ledger::record_created(&pool, &external_id, run_id, "dash-task-1")
        .await
        .expect("first record_created should succeed");
    assert_eq!(first.dashboard_task_id, "dash-task-1");

    // Re-recording the same external_id is a no-op; the originally stored
    // dashboard_task_id is preserved rather than overwritten.
    let second = task_creation_ledger::record_created(&pool, &external_id, run_id, "dash-task-2")
        .await
        .expect("second record_created should succeed");
    assert_eq!(second.dashboard_task_id, "dash-task-1");

    let found = task_creation_ledger::find_by_external_id(&pool, &external_id)
        .await
        .expect("find_by_external_id should succeed")
        .expect("entry should exist");
    assert_eq!(found.dashboard_task_id, "dash-task-1");

    let missing = task_creation_ledger::find_by_external_id(&pool, "no-such-id")
        .await
        .expect("find_by_external_id should succeed");
    assert!(missing.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}
