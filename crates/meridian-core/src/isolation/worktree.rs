//! Git worktree isolation backend.
//!
//! Wraps [`WorktreeManager`] behind the [`Isolation`] trait.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Isolation, WorkspaceInfo};
use crate::worktree::WorktreeManager;

/// Isolation backend backed by git worktrees.
#[derive(Debug)]
pub struct WorktreeIsolation {
    manager: WorktreeManager,
}

impl WorktreeIsolation {
    pub fn new(manager: WorktreeManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &WorktreeManager {
        &self.manager
    }
}

#[async_trait]
impl Isolation for WorktreeIsolation {
    fn name(&self) -> &str {
        "worktree"
    }

    async fn create_workspace(&self, branch: &str) -> Result<WorkspaceInfo> {
        let wt_info = self
            .manager
            .create_worktree(branch)
            .with_context(|| format!("failed to create worktree for branch {branch}"))?;

        Ok(WorkspaceInfo {
            path: wt_info.path,
            branch: wt_info.branch.unwrap_or_else(|| branch.to_string()),
        })
    }

    async fn push(&self, branch: &str) -> Result<()> {
        self.manager
            .push(branch)
            .with_context(|| format!("failed to push branch {branch}"))?;
        Ok(())
    }

    async fn remove_workspace(&self, info: &WorkspaceInfo) -> Result<()> {
        self.manager
            .remove_worktree(&info.path)
            .with_context(|| format!("failed to remove worktree at {}", info.path.display()))?;
        Ok(())
    }
}
