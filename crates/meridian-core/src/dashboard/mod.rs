//! The dashboard REST surface: consumed by the coordinator and task
//! creation pipeline, never implemented here (the dashboard service is
//! out of scope).

pub mod client;
pub mod types;

pub use client::{DashboardClient, HttpDashboardClient};
pub use types::{ContextReport, DashboardTask, Milestone, NewTask, Project, TaskPatch};
