use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Running,
    Completed,
    Aborted,
}

impl fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkflowRunStatus {
    type Err = WorkflowRunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            other => Err(WorkflowRunStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`WorkflowRunStatus`] string.
#[derive(Debug, Clone)]
pub struct WorkflowRunStatusParseError(pub String);

impl fmt::Display for WorkflowRunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid workflow run status: {:?}", self.0)
    }
}

impl std::error::Error for WorkflowRunStatusParseError {}

// ---------------------------------------------------------------------------

/// Terminal status of a single step execution within a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    SkippedDueToCondition,
    SkippedDueToDependency,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::SkippedDueToCondition => "skipped_due_to_condition",
            Self::SkippedDueToDependency => "skipped_due_to_dependency",
        };
        f.write_str(s)
    }
}

impl FromStr for StepStatus {
    type Err = StepStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "skipped_due_to_condition" => Ok(Self::SkippedDueToCondition),
            "skipped_due_to_dependency" => Ok(Self::SkippedDueToDependency),
            other => Err(StepStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StepStatus`] string.
#[derive(Debug, Clone)]
pub struct StepStatusParseError(pub String);

impl fmt::Display for StepStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step status: {:?}", self.0)
    }
}

impl std::error::Error for StepStatusParseError {}

// ---------------------------------------------------------------------------

/// Normalized outcome of a review step (`qa`, `code_review`, `security_review`,
/// `devops_review`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pass,
    Fail,
    Unknown,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for ReviewStatus {
    type Err = ReviewStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "unknown" => Ok(Self::Unknown),
            other => Err(ReviewStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ReviewStatus`] string.
#[derive(Debug, Clone)]
pub struct ReviewStatusParseError(pub String);

impl fmt::Display for ReviewStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid review status: {:?}", self.0)
    }
}

impl std::error::Error for ReviewStatusParseError {}

// ---------------------------------------------------------------------------

/// Direction of a persona dispatcher message, for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventDirection {
    Request,
    Response,
}

impl fmt::Display for EventDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Response => "response",
        };
        f.write_str(s)
    }
}

impl FromStr for EventDirection {
    type Err = EventDirectionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            other => Err(EventDirectionParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`EventDirection`] string.
#[derive(Debug, Clone)]
pub struct EventDirectionParseError(pub String);

impl fmt::Display for EventDirectionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid event direction: {:?}", self.0)
    }
}

impl std::error::Error for EventDirectionParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A single execution of a named workflow, bound to a dashboard task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub project_id: String,
    pub task_id: Option<String>,
    pub workflow_name: String,
    pub branch: String,
    pub status: WorkflowRunStatus,
    pub abort_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The durable record of one step attempt within a workflow run.
///
/// Kept for audit and diagnostic-snapshot reconstruction; the engine's
/// authoritative in-memory state is the [`crate`]-external `WorkflowContext`,
/// not this table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StepExecution {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub step_name: String,
    pub attempt: i32,
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One request or response observed on the persona transport, kept for
/// audit trail and to reconstruct duplicate-suppression history across
/// restarts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PersonaEvent {
    pub id: i64,
    pub workflow_run_id: Uuid,
    pub step: String,
    pub persona: String,
    pub corr_id: String,
    pub direction: EventDirection,
    pub status: Option<String>,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// The normalized outcome of one review step.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReviewResult {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub review_type: String,
    pub status: ReviewStatus,
    pub blocking_issue_count: i32,
    pub raw_payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Idempotency ledger entry mapping a deterministic `external_id` to the
/// dashboard task id it created, surviving process restarts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskCreationLedgerEntry {
    pub external_id: String,
    pub workflow_run_id: Uuid,
    pub dashboard_task_id: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_run_status_display_roundtrip() {
        let variants = [
            WorkflowRunStatus::Running,
            WorkflowRunStatus::Completed,
            WorkflowRunStatus::Aborted,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: WorkflowRunStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn workflow_run_status_invalid() {
        assert!("bogus".parse::<WorkflowRunStatus>().is_err());
    }

    #[test]
    fn step_status_display_roundtrip() {
        let variants = [
            StepStatus::Success,
            StepStatus::Failure,
            StepStatus::SkippedDueToCondition,
            StepStatus::SkippedDueToDependency,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: StepStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn step_status_invalid() {
        assert!("nope".parse::<StepStatus>().is_err());
    }

    #[test]
    fn review_status_display_roundtrip() {
        let variants = [ReviewStatus::Pass, ReviewStatus::Fail, ReviewStatus::Unknown];
        for v in &variants {
            let s = v.to_string();
            let parsed: ReviewStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn review_status_invalid() {
        assert!("maybe".parse::<ReviewStatus>().is_err());
    }

    #[test]
    fn event_direction_display_roundtrip() {
        let variants = [EventDirection::Request, EventDirection::Response];
        for v in &variants {
            let s = v.to_string();
            let parsed: EventDirection = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn event_direction_invalid() {
        assert!("sideways".parse::<EventDirection>().is_err());
    }
}
