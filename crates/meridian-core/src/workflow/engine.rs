//! DAG executor: ready-set resolution, retry/backoff, concurrent
//! execution, and abort propagation.
//!
//! Scheduling shape mirrors the teacher's plan orchestrator — a
//! `Semaphore`-bounded pool of spawned step executions reporting back
//! through an `mpsc` channel, drained under a `CancellationToken` with a
//! bounded drain deadline on abort — generalized from a SQL-backed
//! "ready tasks" query to in-memory dependency-set resolution over a
//! [`ResolvedWorkflow`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meridian_db::models::StepStatus;
use rand::Rng;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use super::context::WorkflowContext;
use super::spec::{ResolvedWorkflow, StepSpec};
use crate::error::{MeridianError, Result};
use crate::step::{StepOutcome, StepOutcomeStatus, StepRegistry};

/// Tunables for a single workflow run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub drain_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of running a workflow to completion or abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed,
    Aborted { reason: String },
}

struct StepDone {
    name: String,
    status: StepStatus,
    outputs: HashMap<String, serde_json::Value>,
    result: HashMap<String, serde_json::Value>,
    abort: bool,
}

/// Run `workflow` to completion against `ctx`, mutating it in place with
/// each step's recorded outputs.
pub async fn run_workflow(
    workflow: &ResolvedWorkflow,
    ctx: &mut WorkflowContext,
    registry: &Arc<StepRegistry>,
    config: &EngineConfig,
    cancel: CancellationToken,
) -> Result<WorkflowOutcome> {
    let steps_by_name: HashMap<&str, &StepSpec> =
        workflow.steps.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut statuses: HashMap<String, StepStatus> = HashMap::new();
    let mut started: std::collections::HashSet<String> = std::collections::HashSet::new();

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<StepDone>(workflow.steps.len().max(1) * 2);
    let mut in_flight: usize = 0;
    let mut abort_reason: Option<String> = None;

    loop {
        if cancel.is_cancelled() || ctx.workflow_aborted {
            abort_reason.get_or_insert_with(|| "workflow cancelled".to_string());
            break;
        }

        if statuses.len() == workflow.steps.len() {
            break;
        }

        // Find steps whose dependencies are all settled and that have not
        // yet been started.
        let mut ready: Vec<&StepSpec> = Vec::new();
        for step in &workflow.steps {
            if started.contains(&step.name) {
                continue;
            }
            let deps_settled = step.depends_on.iter().all(|d| statuses.contains_key(d));
            if !deps_settled {
                continue;
            }
            ready.push(step);
        }

        if ready.is_empty() && in_flight == 0 {
            // Nothing ready and nothing running: either done or deadlocked
            // (should not happen given DAG validation, but don't spin).
            break;
        }

        for step in ready {
            started.insert(step.name.clone());

            let blocked_by = step
                .depends_on
                .iter()
                .find(|d| matches!(statuses.get(*d), Some(StepStatus::Failure) | Some(StepStatus::SkippedDueToDependency)));

            if let Some(dep) = blocked_by {
                let dep = dep.clone();
                statuses.insert(step.name.clone(), StepStatus::SkippedDueToDependency);
                ctx.record_step_outputs(&step.name, "skipped", HashMap::new());
                tracing::debug!(step = %step.name, dependency = %dep, "step skipped due to dependency");
                continue;
            }

            let eligible = ctx.eval_condition(step.condition.as_deref())?;
            if !eligible {
                statuses.insert(step.name.clone(), StepStatus::SkippedDueToCondition);
                ctx.record_step_outputs(&step.name, "skipped", HashMap::new());
                tracing::debug!(step = %step.name, "step skipped due to condition");
                continue;
            }

            let Some(step_impl) = registry.get(&step.step_type) else {
                return Err(MeridianError::Config(format!(
                    "no step registered for type {:?} (step {:?})",
                    step.step_type, step.name
                )));
            };

            let rendered_config = ctx.render(&step.config);
            let retry = step.retry.clone();
            let timeout_ms = step.timeout_ms;
            let outputs_decl = step.outputs.clone();
            let step_name = step.name.clone();
            let permit = Arc::clone(&semaphore).acquire_owned().await.map_err(|e| {
                MeridianError::Transport(format!("semaphore closed: {e}"))
            })?;
            let tx = tx.clone();
            let ctx_snapshot = ctx.clone();

            in_flight += 1;
            tokio::spawn(async move {
                let done = execute_with_retry(
                    step_impl.as_ref(),
                    &step_name,
                    &rendered_config,
                    &ctx_snapshot,
                    &retry,
                    timeout_ms,
                    &outputs_decl,
                )
                .await;
                drop(permit);
                let _ = tx.send(done).await;
            });
        }

        if in_flight == 0 {
            continue;
        }

        tokio::select! {
            maybe_done = rx.recv() => {
                if let Some(done) = maybe_done {
                    in_flight -= 1;
                    let aborted_now = done.abort;
                    statuses.insert(done.name.clone(), done.status.clone());
                    ctx.record_step_outputs(&done.name, &done.status.to_string(), done.outputs);
                    if aborted_now && ctx.mark_aborted() {
                        abort_reason = Some(format!("step {:?} requested abort", done.name));
                    }
                    let _ = done.result;
                }
            }
            _ = cancel.cancelled() => {
                continue;
            }
        }
    }

    if abort_reason.is_some() || ctx.workflow_aborted {
        ctx.mark_aborted();
        let deadline = tokio::time::Instant::now() + config.drain_timeout;
        while in_flight > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(done)) => {
                    in_flight -= 1;
                    statuses.insert(done.name.clone(), done.status.clone());
                }
                _ => break,
            }
        }
        return Ok(WorkflowOutcome::Aborted {
            reason: abort_reason.unwrap_or_else(|| "workflow aborted".to_string()),
        });
    }

    Ok(WorkflowOutcome::Completed)
}

async fn execute_with_retry(
    step: &dyn crate::step::Step,
    name: &str,
    config: &serde_json::Value,
    ctx: &WorkflowContext,
    retry: &super::spec::RetryPolicy,
    timeout_ms: u64,
    outputs_decl: &[String],
) -> StepDone {
    let max_attempts = retry.max_attempts.max(1);
    let mut last_failure_result = HashMap::new();

    for attempt in 0..max_attempts {
        let call = step.execute(config, ctx);
        let outcome: Result<StepOutcome> = match tokio::time::timeout(Duration::from_millis(timeout_ms.max(1)), call).await {
            Ok(inner) => inner,
            Err(_) => Err(MeridianError::Timeout {
                what: name.to_string(),
                elapsed_ms: timeout_ms,
            }),
        };

        match outcome {
            Ok(outcome) if outcome.status == StepOutcomeStatus::Success => {
                let outputs = extract_outputs(&outcome.result, outputs_decl);
                return StepDone {
                    name: name.to_string(),
                    status: StepStatus::Success,
                    outputs,
                    result: outcome.result,
                    abort: false,
                };
            }
            Ok(outcome) => {
                last_failure_result = outcome.result;
                if outcome.abort {
                    return StepDone {
                        name: name.to_string(),
                        status: StepStatus::Failure,
                        outputs: HashMap::new(),
                        result: last_failure_result,
                        abort: true,
                    };
                }
            }
            Err(e) => {
                last_failure_result.insert("error".to_string(), serde_json::Value::String(e.to_string()));
                if !e.retriable() {
                    return StepDone {
                        name: name.to_string(),
                        status: StepStatus::Failure,
                        outputs: HashMap::new(),
                        result: last_failure_result,
                        abort: true,
                    };
                }
            }
        }

        if attempt + 1 < max_attempts {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }

    let abort = max_attempts > 0;
    StepDone {
        name: name.to_string(),
        status: StepStatus::Failure,
        outputs: HashMap::new(),
        result: last_failure_result,
        abort,
    }
}

fn extract_outputs(
    result: &HashMap<String, serde_json::Value>,
    declared: &[String],
) -> HashMap<String, serde_json::Value> {
    declared
        .iter()
        .filter_map(|name| result.get(name).map(|v| (name.clone(), v.clone())))
        .collect()
}

/// 500ms * 2^n + jitter (<=300ms), capped at 15s.
fn backoff_delay(attempt: u32) -> Duration {
    let base = 500u64.saturating_mul(1u64 << attempt.min(20));
    let jitter = rand::rng().random_range(0..=300u64);
    Duration::from_millis((base + jitter).min(15_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_at_fifteen_seconds() {
        for attempt in 0..10 {
            assert!(backoff_delay(attempt) <= Duration::from_secs(15));
        }
    }

    #[test]
    fn backoff_grows_with_attempt() {
        // base-only comparison: attempt 3's floor (500*8=4000ms) exceeds
        // attempt 0's ceiling (500+300=800ms).
        let low = backoff_delay(0);
        let high = backoff_delay(3);
        assert!(high > low);
    }
}
