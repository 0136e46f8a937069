//! Persona request dispatcher: sends a request over the transport, waits
//! for the matching correlated response, retries with a fresh `corr_id` and
//! a growing timeout on failure, and suppresses duplicate receipts.

pub mod info_loop;
pub mod status;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{MeridianError, Result};
use crate::transport::{coordinator_group, persona_group, StreamEntry, Transport};
use status::{apply_qa_pass_downgrade, interpret_status, InterpretedStatus};

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub workflow_id: String,
    pub step: String,
    pub persona: String,
    pub intent: String,
    pub payload: serde_json::Value,
    pub timeout_ms: u64,
    pub deadline_s: u64,
    pub project_id: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchSuccess {
    pub corr_id: String,
    pub status: InterpretedStatus,
}

#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub reason: String,
    pub last_corr_id: String,
    pub attempts: u32,
}

/// Per-persona timeout/retry overrides, defaulting per spec.
#[derive(Debug, Clone)]
pub struct PersonaPolicy {
    pub max_retries: Option<u32>,
    pub retry_backoff_increment_ms: u64,
}

impl Default for PersonaPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            retry_backoff_increment_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub stream_prefix: String,
    pub persona_policies: HashMap<String, PersonaPolicy>,
}

impl DispatcherConfig {
    pub fn policy_for(&self, persona: &str) -> PersonaPolicy {
        self.persona_policies.get(persona).cloned().unwrap_or_default()
    }
}

struct SeenEntry {
    inserted_at: Instant,
}

/// Tracks `(task_id, corr_id, persona)` receipts with a TTL, so a second
/// delivery of the same response is recognized as a duplicate rather than
/// dispatched to a (possibly already-gone) waiter.
pub struct DuplicateSuppressor {
    seen: Mutex<HashMap<String, SeenEntry>>,
    ttl: Duration,
}

impl DuplicateSuppressor {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn key(task_id: &str, corr_id: &str, persona: &str) -> String {
        format!("{task_id}:{corr_id}:{persona}")
    }

    /// Returns `true` if this is the first sighting; `false` if it's a
    /// duplicate within the TTL window.
    pub async fn check_and_mark(&self, task_id: &str, corr_id: &str, persona: &str) -> bool {
        let key = Self::key(task_id, corr_id, persona);
        let mut seen = self.seen.lock().await;
        seen.retain(|_, v| v.inserted_at.elapsed() < self.ttl);
        if seen.contains_key(&key) {
            false
        } else {
            seen.insert(key, SeenEntry { inserted_at: Instant::now() });
            true
        }
    }
}

/// Checks `allowed_languages` in `context` against extensions found in
/// `changed_files`; returns the disallowed extension found, if any.
pub fn language_policy_violation(
    context: &serde_json::Value,
    changed_files: &[String],
) -> Option<String> {
    let allowed: HashSet<String> = context
        .get("allowed_languages")
        .and_then(serde_json::Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(|s| s.to_lowercase()).collect())
        .unwrap_or_default();
    if allowed.is_empty() {
        return None;
    }
    for file in changed_files {
        if let Some(ext) = std::path::Path::new(file).extension().and_then(|e| e.to_str()) {
            if !allowed.contains(&ext.to_lowercase()) {
                return Some(ext.to_string());
            }
        }
    }
    None
}

/// Send a persona request and wait for its correlated response, retrying
/// with a fresh `corr_id` and growing timeout on failure, up to the
/// persona's configured `max_retries` (`None` = unlimited).
pub async fn request(
    transport: &dyn Transport,
    config: &DispatcherConfig,
    req: DispatchRequest,
    changed_files: &[String],
    cancel: CancellationToken,
) -> std::result::Result<DispatchSuccess, DispatchFailure> {
    let is_reviewer_persona = matches!(req.intent.as_str(), "code_review" | "security_review" | "devops_review");
    if is_reviewer_persona {
        if let Some(ext) = language_policy_violation(&req.payload, changed_files) {
            return Err(DispatchFailure {
                reason: format!("language policy violation: extension .{ext} not in allowed_languages"),
                last_corr_id: String::new(),
                attempts: 0,
            });
        }
    }

    let policy = config.policy_for(&req.persona);
    let mut attempt: u32 = 0;
    let mut timeout_ms = req.timeout_ms;
    let mut last_corr_id = String::new();

    loop {
        if cancel.is_cancelled() {
            return Err(DispatchFailure {
                reason: "cancelled before dispatch".to_string(),
                last_corr_id,
                attempts: attempt,
            });
        }

        let corr_id = Uuid::new_v4().to_string();
        last_corr_id = corr_id.clone();

        if let Err(e) = send_request(transport, config, &req, &corr_id).await {
            warn!(error = %e, corr_id = %corr_id, "failed to append persona request");
        } else {
            match wait_for_response(transport, config, &req, &corr_id, timeout_ms, cancel.clone()).await {
                Ok(entry) => {
                    let status_field = entry.fields.get("status").cloned().unwrap_or_default();
                    let result_json: serde_json::Value = entry
                        .fields
                        .get("result")
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or(serde_json::Value::String(
                            entry.fields.get("result").cloned().unwrap_or_default(),
                        ));

                    if status_field == "error" {
                        let err_detail = entry.fields.get("error").cloned().unwrap_or_default();
                        info!(corr_id = %corr_id, persona = %req.persona, error = %err_detail, "persona returned error");
                    } else {
                        let interpreted = interpret_status(&status_field, &result_json);
                        let interpreted = apply_qa_pass_downgrade(interpreted, &req.intent);
                        return Ok(DispatchSuccess {
                            corr_id,
                            status: interpreted,
                        });
                    }
                }
                Err(MeridianError::Timeout { .. }) => {
                    info!(corr_id = %corr_id, persona = %req.persona, timeout_ms, "persona request timed out");
                }
                Err(e) => {
                    warn!(error = %e, corr_id = %corr_id, "error waiting for persona response");
                }
            }
        }

        attempt += 1;
        let exhausted = match policy.max_retries {
            Some(max) => attempt > max,
            None => false,
        };
        if exhausted {
            return Err(DispatchFailure {
                reason: format!("exhausted {attempt} attempts for persona {}", req.persona),
                last_corr_id,
                attempts: attempt,
            });
        }
        timeout_ms += policy.retry_backoff_increment_ms;
    }
}

async fn send_request(
    transport: &dyn Transport,
    config: &DispatcherConfig,
    req: &DispatchRequest,
    corr_id: &str,
) -> Result<()> {
    let stream = format!("{}:requests", config.stream_prefix);
    let group = persona_group(&config.stream_prefix, &req.persona);
    transport.create_group(&stream, &group, "$", true).await?;

    let mut fields = HashMap::new();
    fields.insert("workflow_id".to_string(), req.workflow_id.clone());
    fields.insert("step".to_string(), req.step.clone());
    fields.insert("from".to_string(), "user".to_string());
    fields.insert("to_persona".to_string(), req.persona.clone());
    fields.insert("intent".to_string(), req.intent.clone());
    fields.insert("corr_id".to_string(), corr_id.to_string());
    fields.insert("payload".to_string(), req.payload.to_string());
    fields.insert("deadline_s".to_string(), req.deadline_s.to_string());
    if let Some(v) = &req.project_id {
        fields.insert("project_id".to_string(), v.clone());
    }
    if let Some(v) = &req.repo {
        fields.insert("repo".to_string(), v.clone());
    }
    if let Some(v) = &req.branch {
        fields.insert("branch".to_string(), v.clone());
    }
    if let Some(v) = &req.task_id {
        fields.insert("task_id".to_string(), v.clone());
    }

    transport.append(&stream, fields).await?;
    Ok(())
}

async fn wait_for_response(
    transport: &dyn Transport,
    config: &DispatcherConfig,
    req: &DispatchRequest,
    corr_id: &str,
    timeout_ms: u64,
    cancel: CancellationToken,
) -> Result<StreamEntry> {
    let stream = format!("{}:events", config.stream_prefix);
    let group = coordinator_group(&config.stream_prefix);
    transport.create_group(&stream, &group, "$", true).await?;

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if cancel.is_cancelled() {
            return Err(MeridianError::Timeout {
                what: format!("persona wait for {corr_id} (cancelled)"),
                elapsed_ms: timeout_ms,
            });
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(MeridianError::Timeout {
                what: format!("persona wait for {corr_id}"),
                elapsed_ms: timeout_ms,
            });
        }

        let block_ms = remaining.as_millis().min(1_000) as u64;
        let entries = transport
            .read_group(&stream, &group, "coordinator-1", 20, block_ms)
            .await?;

        for entry in entries {
            if entry.fields.get("corr_id").map(String::as_str) == Some(corr_id)
                && entry.fields.get("workflow_id").map(String::as_str) == Some(&req.workflow_id)
            {
                transport.ack(&stream, &group, &entry.id).await?;
                return Ok(entry);
            }
        }
    }
}
