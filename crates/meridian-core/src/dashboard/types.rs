//! Wire types for the dashboard REST surface (consumed, not implemented
//! here — the dashboard service itself is out of scope).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority_score: Option<i64>,
    #[serde(default)]
    pub milestone_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub blocked_dependencies: Vec<String>,
    #[serde(default)]
    pub lock_version: Option<i64>,
}

/// Payload for `POST /projects/:id/tasks` and the bulk variant.
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority_score: i64,
    pub milestone_id: Option<String>,
    pub labels: Vec<String>,
    pub assignee: String,
    pub external_id: String,
}

/// `PATCH /projects/:id/tasks/:taskId` body with an optimistic lock.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_dependencies: Option<Vec<String>>,
    pub lock_version: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextReport {
    pub repo_id: String,
    pub branch: String,
    pub workflow_id: String,
    pub snapshot_path: String,
    pub summary_path: String,
    pub files_ndjson_path: String,
    pub totals_files: u64,
    pub totals_bytes: u64,
    #[serde(default)]
    pub components_json: Value,
    #[serde(default)]
    pub hotspots_json: Value,
}
