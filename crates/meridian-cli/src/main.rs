mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use meridian_core::coordinator::{run_coordinator, CoordinatorConfig, CoordinatorOutcome};
use meridian_core::dashboard::{DashboardClient, HttpDashboardClient};
use meridian_core::dispatcher::DispatcherConfig;
use meridian_core::isolation::worktree::WorktreeIsolation;
use meridian_core::steps::build_default_registry;
use meridian_core::transport::{MemoryTransport, RedisTransport, Transport};
use meridian_core::worktree::WorktreeManager;
use meridian_core::workflow::{ResolvedWorkflow, WorkflowSpec};

use config::{MeridianConfig, TransportBackend};

#[derive(Parser)]
#[command(name = "meridian", about = "Multi-agent task orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator loop against a dashboard project.
    Coordinator {
        /// Drain: finish in-flight tasks, don't pick up new ones.
        #[arg(long, conflicts_with_all = ["drain_only", "nuke"])]
        drain: bool,
        /// Drain-only: report in-flight tasks without executing anything.
        #[arg(long, conflicts_with_all = ["drain", "nuke"])]
        drain_only: bool,
        /// Nuke: reset stuck `in_progress` tasks back to `open` and exit.
        #[arg(long, conflicts_with_all = ["drain", "drain_only"])]
        nuke: bool,
        /// Dashboard project id to run against.
        project_id: String,
        /// Path to the git working copy the coordinator drives worktrees
        /// from (cloning/fetching it is the operator's job, out of scope
        /// here). Defaults to the current directory.
        repo_url: Option<String>,
        /// Base branch worktrees branch from.
        base_branch: Option<String>,
    },
}

fn workflow_path() -> PathBuf {
    std::env::var("MERIDIAN_WORKFLOW_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("workflow.yaml"))
}

/// Directory of named child workflows a `sub_workflow` step may invoke by
/// name (file stem = name). Unset or missing means no sub-workflows are
/// available, which is fine for a `task_flow` that doesn't use them.
fn subworkflows_dir() -> Option<PathBuf> {
    std::env::var("MERIDIAN_SUBWORKFLOWS_PATH").ok().map(PathBuf::from)
}

fn load_sub_workflows(dir: Option<PathBuf>) -> anyhow::Result<HashMap<String, ResolvedWorkflow>> {
    let mut workflows = HashMap::new();
    let Some(dir) = dir else {
        return Ok(workflows);
    };
    if !dir.is_dir() {
        return Ok(workflows);
    }
    for entry in std::fs::read_dir(&dir).with_context(|| format!("failed to read sub-workflow dir {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        let yaml = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let resolved = WorkflowSpec::from_yaml(&yaml)
            .and_then(|spec| spec.resolve())
            .map_err(|e| anyhow::anyhow!("invalid sub-workflow {}: {e}", path.display()))?;
        workflows.insert(name, resolved);
    }
    Ok(workflows)
}

async fn build_transport(backend: &TransportBackend) -> anyhow::Result<Arc<dyn Transport>> {
    match backend {
        TransportBackend::Memory => Ok(Arc::new(MemoryTransport::new())),
        TransportBackend::Redis { url } => {
            let transport = RedisTransport::connect(url)
                .await
                .with_context(|| format!("failed to connect to redis at {url}"))?;
            Ok(Arc::new(transport))
        }
    }
}

/// `--nuke`: patch every `in_progress` task back to `open`, clearing stuck
/// locks from a coordinator that died mid-task. Does not run the coordinator
/// loop.
async fn run_nuke(dashboard: &dyn DashboardClient, project_id: &str) -> anyhow::Result<()> {
    let tasks = dashboard.list_tasks(project_id).await?;
    let mut reset = 0;
    for task in tasks.iter().filter(|t| t.status.as_deref() == Some("in_progress")) {
        dashboard
            .patch_task(
                project_id,
                &task.id,
                &meridian_core::dashboard::TaskPatch {
                    status: Some("open".to_string()),
                    blocked_dependencies: None,
                    lock_version: task.lock_version.unwrap_or(0) + 1,
                },
            )
            .await?;
        reset += 1;
    }
    println!("reset {reset} stuck task(s) back to open");
    Ok(())
}

/// `--drain-only`: list tasks still `in_progress` without touching anything.
async fn run_drain_report(dashboard: &dyn DashboardClient, project_id: &str) -> anyhow::Result<()> {
    let tasks = dashboard.list_tasks(project_id).await?;
    let in_progress: Vec<_> = tasks
        .iter()
        .filter(|t| t.status.as_deref() == Some("in_progress"))
        .collect();
    if in_progress.is_empty() {
        println!("no in-progress tasks");
    } else {
        for task in &in_progress {
            println!("{}  {}", task.id, task.title);
        }
    }
    Ok(())
}

async fn run_coordinator_command(
    project_id: String,
    repo_url: Option<String>,
    base_branch: Option<String>,
    drain: bool,
) -> anyhow::Result<()> {
    let config = MeridianConfig::from_env();

    let db_pool = meridian_db::pool::create_pool(&config.db).await?;
    meridian_db::pool::run_migrations(&db_pool, meridian_db::pool::default_migrations_path()).await?;

    let dashboard = HttpDashboardClient::new(config.dashboard.base_url.clone())
        .with_api_token(config.dashboard.api_token.clone());

    let project = dashboard
        .get_project(&project_id)
        .await
        .with_context(|| format!("failed to fetch project {project_id}"))?;

    let milestones = dashboard.list_milestones(&project_id).await?;
    let backlog_milestone_id = milestones
        .iter()
        .find(|m| m.slug == "backlog")
        .map(|m| m.id.clone())
        .ok_or_else(|| anyhow::anyhow!("project {project_id} has no \"backlog\" milestone"))?;

    let repo_path = repo_url
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().expect("cwd should be readable"));
    let manager = WorktreeManager::new(repo_path, None)
        .map_err(|e| anyhow::anyhow!("failed to open git repository: {e}"))?;
    let isolation = WorktreeIsolation::new(manager);

    let workflow_path = workflow_path();
    let workflow_yaml = std::fs::read_to_string(&workflow_path)
        .with_context(|| format!("failed to read workflow file at {}", workflow_path.display()))?;
    let task_flow = WorkflowSpec::from_yaml(&workflow_yaml)
        .and_then(|spec| spec.resolve())
        .map_err(|e| anyhow::anyhow!("invalid workflow {}: {e}", workflow_path.display()))?;

    let transport = build_transport(&config.transport.backend).await?;
    let dispatcher_config = DispatcherConfig::default();
    let sub_workflows = load_sub_workflows(subworkflows_dir())?;
    let registry = build_default_registry(transport.clone(), dispatcher_config.clone(), sub_workflows);

    let coordinator_config = CoordinatorConfig {
        project_id: project_id.clone(),
        project_slug: project.slug,
        base_branch: base_branch.unwrap_or_else(|| "main".to_string()),
        max_iterations: config.coordinator.max_iterations,
        backlog_milestone_id,
        drain_only: drain,
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let outcome = run_coordinator(
        &coordinator_config,
        &dashboard,
        &isolation,
        &registry,
        &task_flow,
        &db_pool,
        transport.as_ref(),
        &dispatcher_config,
        cancel,
    )
    .await;

    db_pool.close().await;

    match outcome {
        Ok(CoordinatorOutcome::Done { iterations }) => {
            println!("coordinator done after {iterations} iteration(s)");
            Ok(())
        }
        Ok(CoordinatorOutcome::IterationCapReached { iterations }) => {
            println!("coordinator stopped at iteration cap ({iterations})");
            Ok(())
        }
        Ok(CoordinatorOutcome::Interrupted { iterations }) => {
            println!("coordinator interrupted after {iterations} iteration(s)");
            Ok(())
        }
        Ok(CoordinatorOutcome::Aborted { task_id, reason }) => {
            anyhow::bail!("task {task_id} aborted: {reason}");
        }
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Coordinator {
            drain,
            drain_only,
            nuke,
            project_id,
            repo_url,
            base_branch,
        } => {
            let _ = &repo_url;
            let _ = &base_branch;
            if nuke {
                let config = MeridianConfig::from_env();
                let dashboard = HttpDashboardClient::new(config.dashboard.base_url.clone())
                    .with_api_token(config.dashboard.api_token.clone());
                run_nuke(&dashboard, &project_id).await
            } else if drain_only {
                let config = MeridianConfig::from_env();
                let dashboard = HttpDashboardClient::new(config.dashboard.base_url.clone())
                    .with_api_token(config.dashboard.api_token.clone());
                run_drain_report(&dashboard, &project_id).await
            } else {
                run_coordinator_command(project_id, repo_url, base_branch, drain).await
            }
        }
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}
