//! The dashboard HTTP client contract. The dashboard service itself is
//! out of scope; this crate only consumes its REST surface.

use async_trait::async_trait;

use super::types::{ContextReport, DashboardTask, Milestone, NewTask, Project, TaskPatch};
use crate::error::{MeridianError, Result};

/// Everything the coordinator and task-creation pipeline need from the
/// dashboard. A real implementation wraps `reqwest`; tests substitute a
/// fake.
#[async_trait]
pub trait DashboardClient: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Project>;
    async fn list_tasks(&self, project_id: &str) -> Result<Vec<DashboardTask>>;
    async fn list_milestones(&self, project_id: &str) -> Result<Vec<Milestone>>;
    async fn create_milestone(&self, project_id: &str, slug: &str, title: &str) -> Result<Milestone>;
    async fn create_task(&self, project_id: &str, task: &NewTask) -> Result<DashboardTask>;
    async fn create_tasks_bulk(&self, project_id: &str, tasks: &[NewTask]) -> Result<Vec<DashboardTask>>;
    async fn patch_task(&self, project_id: &str, task_id: &str, patch: &TaskPatch) -> Result<DashboardTask>;
    async fn post_context_report(&self, endpoint: &str, report: &ContextReport) -> Result<()>;
}

/// `reqwest`-backed implementation against a real dashboard deployment.
pub struct HttpDashboardClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpDashboardClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token: None,
        }
    }

    pub fn with_api_token(mut self, api_token: Option<String>) -> Self {
        self.api_token = api_token;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl DashboardClient for HttpDashboardClient {
    async fn get_project(&self, project_id: &str) -> Result<Project> {
        send_json(self.authed(self.http.get(self.url(&format!("/projects/{project_id}"))))).await
    }

    async fn list_tasks(&self, project_id: &str) -> Result<Vec<DashboardTask>> {
        send_json(self.authed(self.http.get(self.url(&format!("/projects/{project_id}/tasks"))))).await
    }

    async fn list_milestones(&self, project_id: &str) -> Result<Vec<Milestone>> {
        send_json(self.authed(self.http.get(self.url(&format!("/projects/{project_id}/milestones"))))).await
    }

    async fn create_milestone(&self, project_id: &str, slug: &str, title: &str) -> Result<Milestone> {
        let body = serde_json::json!({"slug": slug, "title": title});
        send_json(
            self.authed(self.http.post(self.url(&format!("/projects/{project_id}/milestones"))))
                .json(&body),
        )
        .await
    }

    async fn create_task(&self, project_id: &str, task: &NewTask) -> Result<DashboardTask> {
        send_json(
            self.authed(self.http.post(self.url(&format!("/projects/{project_id}/tasks"))))
                .json(task),
        )
        .await
    }

    async fn create_tasks_bulk(&self, project_id: &str, tasks: &[NewTask]) -> Result<Vec<DashboardTask>> {
        let body = serde_json::json!({"tasks": tasks});
        send_json(
            self.authed(self.http.post(self.url(&format!("/projects/{project_id}/tasks:bulk"))))
                .json(&body),
        )
        .await
    }

    async fn patch_task(&self, project_id: &str, task_id: &str, patch: &TaskPatch) -> Result<DashboardTask> {
        send_json(
            self.authed(self.http.patch(self.url(&format!("/projects/{project_id}/tasks/{task_id}"))))
                .json(patch),
        )
        .await
    }

    async fn post_context_report(&self, endpoint: &str, report: &ContextReport) -> Result<()> {
        let resp = self
            .authed(self.http.post(self.url(endpoint)))
            .json(report)
            .send()
            .await
            .map_err(|e| MeridianError::External(format!("context report post failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(MeridianError::External(format!(
                "context report post returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

async fn send_json<T: serde::de::DeserializeOwned>(builder: reqwest::RequestBuilder) -> Result<T> {
    let resp = builder
        .send()
        .await
        .map_err(|e| MeridianError::External(format!("dashboard request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(MeridianError::External(format!("dashboard returned {status}")));
    }

    resp.json::<T>()
        .await
        .map_err(|e| MeridianError::External(format!("dashboard response decode failed: {e}")))
}
