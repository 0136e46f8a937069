//! Workspace isolation abstraction.
//!
//! The coordinator runs every task against its own git worktree rather than
//! the shared working copy, so concurrent task branches never collide on
//! the filesystem.

pub mod worktree;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

/// Information about a created workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    /// Filesystem path to the workspace.
    pub path: PathBuf,
    /// Git branch checked out in the workspace.
    pub branch: String,
}

/// Trait for workspace isolation backends. A single `worktree` backend is
/// provided; the trait boundary is kept so step/test code can substitute a
/// fake without touching a real git repository.
#[async_trait]
pub trait Isolation: Send + Sync {
    fn name(&self) -> &str;

    /// Create an isolated workspace checked out on `branch`.
    async fn create_workspace(&self, branch: &str) -> Result<WorkspaceInfo>;

    /// Push `branch` to the remote.
    async fn push(&self, branch: &str) -> Result<()>;

    /// Remove a previously created workspace.
    async fn remove_workspace(&self, info: &WorkspaceInfo) -> Result<()>;
}
