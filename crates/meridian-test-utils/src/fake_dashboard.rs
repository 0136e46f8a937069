//! In-memory stand-in for the external project dashboard, used by
//! scenario tests that drive the coordinator without a real dashboard
//! deployment.

use std::sync::Mutex;

use async_trait::async_trait;
use meridian_core::dashboard::{
    ContextReport, DashboardClient, DashboardTask, Milestone, NewTask, Project, TaskPatch,
};
use meridian_core::error::{MeridianError, Result};

struct Inner {
    project: Project,
    milestones: Vec<Milestone>,
    tasks: Vec<DashboardTask>,
    context_reports: Vec<(String, ContextReport)>,
    next_id: u64,
}

/// A fake [`DashboardClient`] backed by an in-memory store, seeded with a
/// project and (optionally) a "backlog" milestone.
///
/// Tasks are assigned ids `"task-1"`, `"task-2"`, ... in creation order.
/// `patch_task` enforces the same optimistic-locking contract the real
/// dashboard does: the submitted `lock_version` must be exactly one past
/// the task's current version, or the patch is rejected.
pub struct FakeDashboardClient {
    inner: Mutex<Inner>,
}

impl FakeDashboardClient {
    pub fn new(project: Project) -> Self {
        Self {
            inner: Mutex::new(Inner {
                project,
                milestones: Vec::new(),
                tasks: Vec::new(),
                context_reports: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Seed a milestone directly (bypassing `create_milestone`), useful for
    /// giving a test a ready-made "backlog" milestone id.
    pub fn with_milestone(self, id: impl Into<String>, slug: impl Into<String>) -> Self {
        let milestone = Milestone {
            id: id.into(),
            slug: slug.into(),
            title: None,
        };
        self.inner.lock().expect("lock poisoned").milestones.push(milestone);
        self
    }

    /// Seed a task directly (bypassing `create_task`), for tests that want
    /// to start the coordinator against a pre-populated backlog.
    pub fn with_task(self, task: DashboardTask) -> Self {
        self.inner.lock().expect("lock poisoned").tasks.push(task);
        self
    }

    /// Snapshot every task currently held, for assertions after a run.
    pub fn tasks_snapshot(&self) -> Vec<DashboardTask> {
        self.inner.lock().expect("lock poisoned").tasks.clone()
    }

    /// Snapshot every context report posted, for assertions after a run.
    pub fn context_reports_snapshot(&self) -> Vec<(String, ContextReport)> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .context_reports
            .clone()
    }
}

#[async_trait]
impl DashboardClient for FakeDashboardClient {
    async fn get_project(&self, project_id: &str) -> Result<Project> {
        let inner = self.inner.lock().expect("lock poisoned");
        if inner.project.id != project_id {
            return Err(MeridianError::External(format!(
                "no such project {project_id}"
            )));
        }
        Ok(inner.project.clone())
    }

    async fn list_tasks(&self, _project_id: &str) -> Result<Vec<DashboardTask>> {
        Ok(self.inner.lock().expect("lock poisoned").tasks.clone())
    }

    async fn list_milestones(&self, _project_id: &str) -> Result<Vec<Milestone>> {
        Ok(self.inner.lock().expect("lock poisoned").milestones.clone())
    }

    async fn create_milestone(
        &self,
        _project_id: &str,
        slug: &str,
        title: &str,
    ) -> Result<Milestone> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(existing) = inner.milestones.iter().find(|m| m.slug == slug) {
            return Ok(existing.clone());
        }
        let id = format!("milestone-{}", inner.next_id);
        inner.next_id += 1;
        let milestone = Milestone {
            id,
            slug: slug.to_string(),
            title: Some(title.to_string()),
        };
        inner.milestones.push(milestone.clone());
        Ok(milestone)
    }

    async fn create_task(&self, _project_id: &str, task: &NewTask) -> Result<DashboardTask> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(existing) = inner
            .tasks
            .iter()
            .find(|t| t.external_id.as_deref() == Some(task.external_id.as_str()))
        {
            return Ok(existing.clone());
        }
        let id = format!("task-{}", inner.next_id);
        inner.next_id += 1;
        let created = DashboardTask {
            id,
            title: task.title.clone(),
            slug: None,
            status: Some("open".to_string()),
            priority_score: Some(task.priority_score),
            milestone_id: task.milestone_id.clone(),
            description: Some(task.description.clone()),
            labels: task.labels.clone(),
            assignee: Some(task.assignee.clone()),
            external_id: Some(task.external_id.clone()),
            blocked_dependencies: Vec::new(),
            lock_version: Some(0),
        };
        inner.tasks.push(created.clone());
        Ok(created)
    }

    async fn create_tasks_bulk(
        &self,
        project_id: &str,
        tasks: &[NewTask],
    ) -> Result<Vec<DashboardTask>> {
        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            created.push(self.create_task(project_id, task).await?);
        }
        Ok(created)
    }

    async fn patch_task(
        &self,
        _project_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<DashboardTask> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| MeridianError::External(format!("no such task {task_id}")))?;

        let current_version = task.lock_version.unwrap_or(0);
        if patch.lock_version != current_version + 1 {
            return Err(MeridianError::External(format!(
                "dashboard returned 409 Conflict (stale lock_version for task {task_id})"
            )));
        }

        if let Some(status) = &patch.status {
            task.status = Some(status.clone());
        }
        if let Some(blocked) = &patch.blocked_dependencies {
            task.blocked_dependencies = blocked.clone();
        }
        task.lock_version = Some(patch.lock_version);
        Ok(task.clone())
    }

    async fn post_context_report(&self, endpoint: &str, report: &ContextReport) -> Result<()> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .context_reports
            .push((endpoint.to_string(), report.clone()));
        Ok(())
    }
}
