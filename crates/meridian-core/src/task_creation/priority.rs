//! Priority normalization, scoring, milestone routing, and title/label
//! rules for synthesized follow-up tasks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Keyword-match free-form priority text into one of the four tiers,
    /// defaulting to `Medium` for anything unrecognized.
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("critical") || lower.contains("urgent") || lower.contains("blocker") {
            Priority::Critical
        } else if lower.contains("high") {
            Priority::High
        } else if lower.contains("low") || lower.contains("minor") || lower.contains("trivial") {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    fn is_urgent(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }
}

/// Deterministic numeric priority score per §4.7.
pub fn priority_score(priority: Priority, review_type: &str, title: &str) -> i64 {
    let is_qa = review_type.eq_ignore_ascii_case("qa") || title.contains("[QA]");
    if priority.is_urgent() && is_qa {
        1200
    } else if priority.is_urgent() {
        1000
    } else {
        50
    }
}

/// Milestone routing: urgent tasks target the parent milestone (falling
/// back to backlog with a warning if unknown); everything else targets
/// backlog.
pub fn route_milestone(
    priority: Priority,
    parent_milestone_id: Option<&str>,
    backlog_milestone_id: &str,
) -> (String, Option<String>) {
    if priority.is_urgent() {
        match parent_milestone_id {
            Some(id) => (id.to_string(), None),
            None => (
                backlog_milestone_id.to_string(),
                Some("urgent follow-up has no parent milestone; routed to backlog".to_string()),
            ),
        }
    } else {
        (backlog_milestone_id.to_string(), None)
    }
}

/// Title normalization: `[<UPPER-LABEL>]` prefix (not doubled), 🚨 for
/// urgent, 📋 for deferred. Empty titles fall back to the parent task's
/// title with the same prefix.
pub fn normalize_title(
    raw_title: &str,
    review_type: Option<&str>,
    priority: Priority,
    deferred: bool,
    parent_task_title: &str,
) -> String {
    let base = if raw_title.trim().is_empty() {
        parent_task_title.to_string()
    } else {
        raw_title.trim().to_string()
    };

    let prefixed = match review_type {
        Some(rt) => {
            let label = format!("[{}]", rt.to_uppercase());
            if base.contains(&label) {
                base
            } else {
                format!("{label} {base}")
            }
        }
        None => base,
    };

    let marker = if priority.is_urgent() {
        "\u{1f6a8} "
    } else if deferred {
        "\u{1f4cb} "
    } else {
        ""
    };

    if marker.is_empty() || prefixed.starts_with(marker.trim()) {
        prefixed
    } else {
        format!("{marker}{prefixed}")
    }
}

/// Always overridden regardless of the persona's suggested assignee.
pub const FORCED_ASSIGNEE: &str = "implementation-planner";

const BLOCKED_LABELS: &[&str] = &[
    "analysis",
    "analysis_follow_up",
    "analysis-follow-up",
    "review_follow_up",
    "review-follow-up",
];

/// Strip blocked labels (case-insensitive) and always include the
/// mandatory `review-follow-up`, `<review_type>-follow-up`, and (for
/// urgent tasks) `urgent` labels.
pub fn normalize_labels(raw_labels: &[String], review_type: &str, priority: Priority) -> Vec<String> {
    let mut out: Vec<String> = raw_labels
        .iter()
        .filter(|l| !BLOCKED_LABELS.iter().any(|b| b.eq_ignore_ascii_case(l)))
        .cloned()
        .collect();

    let mut ensure = |label: String| {
        if !out.iter().any(|l| l.eq_ignore_ascii_case(&label)) {
            out.push(label);
        }
    };

    ensure("review-follow-up".to_string());
    ensure(format!("{review_type}-follow-up"));
    if priority.is_urgent() {
        ensure("urgent".to_string());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_urgent_scores_highest() {
        assert_eq!(priority_score(Priority::Critical, "qa", "x"), 1200);
    }

    #[test]
    fn other_urgent_scores_1000() {
        assert_eq!(priority_score(Priority::High, "code_review", "x"), 1000);
    }

    #[test]
    fn medium_and_low_score_flat_50() {
        assert_eq!(priority_score(Priority::Medium, "qa", "x"), 50);
        assert_eq!(priority_score(Priority::Low, "qa", "x"), 50);
    }

    #[test]
    fn title_prefix_not_doubled() {
        let t = normalize_title("[QA] already prefixed", Some("qa"), Priority::Low, false, "parent");
        assert_eq!(t, "[QA] already prefixed");
    }

    #[test]
    fn urgent_marker_added_once() {
        let t = normalize_title("fix the bug", Some("qa"), Priority::Critical, false, "parent");
        assert_eq!(t, "\u{1f6a8} [QA] fix the bug");
    }

    #[test]
    fn empty_title_falls_back_to_parent() {
        let t = normalize_title("", Some("qa"), Priority::Medium, false, "Parent task title");
        assert_eq!(t, "[QA] Parent task title");
    }

    #[test]
    fn urgent_without_parent_milestone_routes_to_backlog_with_warning() {
        let (milestone, warning) = route_milestone(Priority::Critical, None, "backlog-1");
        assert_eq!(milestone, "backlog-1");
        assert!(warning.is_some());
    }

    #[test]
    fn blocked_labels_stripped_and_mandatory_labels_added() {
        let labels = vec!["analysis".to_string(), "keep-me".to_string()];
        let out = normalize_labels(&labels, "qa", Priority::Critical);
        assert!(!out.iter().any(|l| l == "analysis"));
        assert!(out.contains(&"keep-me".to_string()));
        assert!(out.contains(&"review-follow-up".to_string()));
        assert!(out.contains(&"qa-follow-up".to_string()));
        assert!(out.contains(&"urgent".to_string()));
    }
}
