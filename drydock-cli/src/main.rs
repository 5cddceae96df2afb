//! Drydock CLI
//!
//! Manual pipeline trigger: builds a `RunRequest` from flags and drives
//! one run to completion. With `--database-url` the run is recorded like
//! any webhook-triggered pipeline; without it the engine runs without
//! persistence and only the terminal status is reported via the exit code.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use drydock_core::domain::PipelineStatus;
use drydock_core::request::RunRequest;
use drydock_core::store::Store;
use drydock_engine::config::EngineConfig;
use drydock_engine::executor::DockerExecutor;
use drydock_engine::fetch::GitFetcher;
use drydock_engine::runner::PipelineRunner;
use drydock_engine::shell::SshDialer;
use drydock_store::PgStore;

#[derive(Parser, Debug)]
#[command(name = "drydock", about = "Run a CI/CD pipeline for one commit")]
struct Args {
    /// Repository clone URL
    #[arg(long)]
    repo_url: String,

    /// Repository name, used for the compose project and workspace naming
    #[arg(long)]
    repo_name: String,

    /// Branch to clone
    #[arg(long, default_value = "main")]
    branch: String,

    /// Commit to pin the checkout to
    #[arg(long)]
    commit: String,

    /// Access token embedded into https clone URLs
    #[arg(long, default_value = "")]
    access_token: String,

    /// Pipeline document inside the repository
    #[arg(long, default_value = "pipeline.yml")]
    pipeline_file: String,

    /// Compose document inside the repository
    #[arg(long, default_value = "docker-compose.yml")]
    deployment_file: String,

    /// SSH deploy target as host[:port]; enables the remote flow together
    /// with --registry-user
    #[arg(long, default_value = "")]
    ssh_host: String,

    #[arg(long, default_value = "")]
    ssh_user: String,

    /// Path to the SSH private key for the deploy target
    #[arg(long)]
    ssh_key_file: Option<std::path::PathBuf>,

    #[arg(long, default_value = "")]
    registry_user: String,

    #[arg(long, default_value = "")]
    registry_token: String,

    /// Postgres URL; when set, the run is persisted
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drydock=info,drydock_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let ssh_private_key = match &args.ssh_key_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ssh key from {}", path.display()))?,
        None => String::new(),
    };

    let store: Option<Arc<dyn Store>> = match &args.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("failed to connect to database")?;
            Some(Arc::new(store))
        }
        None => {
            warn!("no database configured, running without persistence");
            None
        }
    };

    let config = EngineConfig::from_env();
    config.validate()?;

    let executor = Arc::new(DockerExecutor::connect().context("failed to connect to docker")?);
    let fetcher = Arc::new(GitFetcher::new());
    let dialer = Arc::new(SshDialer::new());

    // Without a store there are no pre-existing records; fresh ids keep
    // log and status bookkeeping coherent within the run.
    let (project_id, pipeline_id) = match &store {
        Some(store) => {
            let project = store
                .project_by_repo_url(&args.repo_url)
                .await?
                .context("no project registered for this repo URL")?;
            let pipeline = store
                .create_pipeline(project.id, &args.branch, &args.commit)
                .await?;
            (project.id, pipeline.id)
        }
        None => (Uuid::new_v4(), Uuid::new_v4()),
    };

    let request = RunRequest {
        repo_url: args.repo_url,
        repo_name: args.repo_name,
        branch: args.branch,
        commit_hash: args.commit,
        access_token: args.access_token,
        pipeline_filename: args.pipeline_file,
        deployment_filename: args.deployment_file,
        ssh_host: args.ssh_host,
        ssh_user: args.ssh_user,
        ssh_private_key,
        registry_user: args.registry_user,
        registry_token: args.registry_token,
        project_id,
        pipeline_id,
    };

    let runner = PipelineRunner::new(executor, fetcher, dialer, store, config);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            signal_cancel.cancel();
        }
    });

    let status = runner.run(request, cancel).await;
    info!(status = %status, "run complete");

    match status {
        PipelineStatus::Success => Ok(()),
        other => {
            std::process::exit(match other {
                PipelineStatus::Cancelled => 130,
                _ => 1,
            });
        }
    }
}
