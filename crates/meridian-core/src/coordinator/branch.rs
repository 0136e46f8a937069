//! Branch name selection for a task, in priority order (§4.5).

/// Choose a branch name for the task about to run.
///
/// Priority order:
/// 1. An explicit branch carried on the incoming payload.
/// 2. `feat/<task-slug>` if a task slug is available.
/// 3. `milestone/<milestone-slug>` if a non-generic milestone slug is
///    available (never `milestone/milestone`).
/// 4. `milestone/<project-slug>`.
pub fn select_branch(
    payload_branch: Option<&str>,
    task_slug: Option<&str>,
    milestone_slug: Option<&str>,
    project_slug: &str,
) -> String {
    if let Some(branch) = payload_branch {
        if !branch.trim().is_empty() {
            return branch.to_string();
        }
    }

    if let Some(slug) = task_slug {
        if !slug.trim().is_empty() {
            return format!("feat/{slug}");
        }
    }

    if let Some(slug) = milestone_slug {
        if !slug.trim().is_empty() && !slug.eq_ignore_ascii_case("milestone") {
            return format!("milestone/{slug}");
        }
    }

    format!("milestone/{project_slug}")
}
