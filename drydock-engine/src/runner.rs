//! Pipeline runner
//!
//! The top-level state machine for one run: clone, parse, pre-record the
//! plan, execute stages serially with fail-fast semantics, deploy on
//! success, roll back on deployment failure, and finalize every status.
//!
//! Within a run, jobs are strictly serial; the only concurrent task is the
//! log pump demultiplexing the active container's output. Across runs the
//! trigger layer decides concurrency by launching runners in parallel.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use drydock_core::config::pipeline::{PipelineFile, PlannedJob};
use drydock_core::domain::{DeploymentStatus, JobStatus, PipelineStatus};
use drydock_core::names::sanitize_project_name;
use drydock_core::request::RunRequest;
use drydock_core::store::Store;

use crate::config::EngineConfig;
use crate::deploy::{DeploymentEngine, RecoveryOutcome, RollbackDriver};
use crate::executor::{ContainerExecutor, LineAssembler, LogStream};
use crate::fetch::{Checkout, SourceFetcher};
use crate::shell::ShellDialer;
use crate::sink::{DeployLog, LogSink, StoreSink};
use crate::workspace::Workspace;

/// How a single job ended
enum JobOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Drives pipeline runs end to end
///
/// One long-lived instance serves any number of runs; all shared runtime
/// state (engine connection, registry auth) lives in the executor handle.
pub struct PipelineRunner {
    executor: Arc<dyn ContainerExecutor>,
    fetcher: Arc<dyn SourceFetcher>,
    store: Option<Arc<dyn Store>>,
    sink: Arc<dyn LogSink>,
    deployer: DeploymentEngine,
    rollback: RollbackDriver,
    config: EngineConfig,
}

impl PipelineRunner {
    pub fn new(
        executor: Arc<dyn ContainerExecutor>,
        fetcher: Arc<dyn SourceFetcher>,
        dialer: Arc<dyn ShellDialer>,
        store: Option<Arc<dyn Store>>,
        config: EngineConfig,
    ) -> Self {
        let sink: Arc<dyn LogSink> =
            Arc::new(StoreSink::new(store.clone(), config.log_batch_size));
        let deployer = DeploymentEngine::new(executor.clone(), dialer, config.clone());
        let rollback = RollbackDriver::new(fetcher.clone(), store.clone(), config.clone());

        Self {
            executor,
            fetcher,
            store,
            sink,
            deployer,
            rollback,
            config,
        }
    }

    /// Runs one pipeline to a terminal status
    ///
    /// Never panics outward and never returns a transport error: every
    /// failure mode collapses into the terminal status plus persisted logs.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> PipelineStatus {
        info!(
            pipeline = %request.pipeline_id,
            repo = %request.repo_name,
            commit = %request.commit_hash,
            "starting pipeline"
        );

        let status = self.run_inner(&request, &cancel).await;

        self.set_pipeline_status(request.pipeline_id, status).await;
        if status != PipelineStatus::Success {
            self.fail_pending_deployment(request.pipeline_id).await;
        }

        info!(pipeline = %request.pipeline_id, status = %status, "pipeline finished");
        status
    }

    async fn run_inner(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> PipelineStatus {
        self.set_pipeline_status(request.pipeline_id, PipelineStatus::Running)
            .await;

        // The workspace guard releases the directory on every exit path
        // out of this function, including unwinds.
        let workspace = match Workspace::for_run(
            &self.config.workspace_root,
            &request.repo_name,
            request.commit_short(),
        ) {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "failed to create workspace");
                return PipelineStatus::Failed;
            }
        };

        let checkout = Checkout {
            repo_url: request.repo_url.clone(),
            branch: request.branch.clone(),
            commit_hash: request.commit_hash.clone(),
            access_token: request.access_token.clone(),
        };
        if let Err(e) = self.fetcher.fetch(&checkout, workspace.path()).await {
            error!(error = %e, "failed to fetch source");
            self.sink
                .append_deployment_line(request.pipeline_id, &format!("Source fetch failed: {e}"))
                .await;
            return PipelineStatus::Failed;
        }

        let config_path = workspace.path().join(&request.pipeline_filename);
        let pipeline_file = match PipelineFile::load(&config_path) {
            Ok(file) => file,
            Err(e) => {
                error!(error = %e, "failed to load pipeline config");
                self.sink
                    .append_deployment_line(request.pipeline_id, &format!("{e}"))
                    .await;
                return PipelineStatus::Failed;
            }
        };

        let plan = match pipeline_file.plan() {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "invalid pipeline plan");
                self.sink
                    .append_deployment_line(request.pipeline_id, &format!("{e}"))
                    .await;
                return PipelineStatus::Failed;
            }
        };

        info!(
            stages = pipeline_file.stages.len(),
            jobs = plan.len(),
            "pipeline plan loaded"
        );

        // Pre-record the whole plan and the pending deployment so the read
        // model shows the run shape before anything executes.
        let job_ids = self.record_plan(request, &plan).await;
        self.create_pending_deployment(request.pipeline_id).await;

        let env = self.compose_env(request).await;

        let mut current_stage = usize::MAX;
        for (job, job_id) in plan.iter().zip(job_ids.iter()) {
            if cancel.is_cancelled() {
                warn!(pipeline = %request.pipeline_id, "run cancelled");
                return PipelineStatus::Cancelled;
            }

            if job.stage_index != current_stage {
                current_stage = job.stage_index;
                info!(stage = %job.stage, "running stage");
            }

            match self
                .execute_job(job, *job_id, workspace.path(), &env, cancel)
                .await
            {
                JobOutcome::Success => {}
                JobOutcome::Failed => return PipelineStatus::Failed,
                JobOutcome::Cancelled => return PipelineStatus::Cancelled,
            }
        }

        match self.run_deployment(request, workspace.path()).await {
            DeploymentStatus::Success => PipelineStatus::Success,
            _ => PipelineStatus::Failed,
        }
    }

    async fn execute_job(
        &self,
        job: &PlannedJob,
        job_id: Uuid,
        workspace: &std::path::Path,
        env: &[String],
        cancel: &CancellationToken,
    ) -> JobOutcome {
        info!(job = %job.name, image = %job.image, "running job");
        self.set_job_status(job_id, JobStatus::Running, None).await;

        if let Err(e) = self.executor.pull_image(&job.image).await {
            error!(job = %job.name, error = %e, "image pull failed");
            self.sink.append_job_line(job_id, &format!("{e}")).await;
            self.sink.flush_job(job_id).await;
            self.set_job_status(job_id, JobStatus::Failed, Some(1)).await;
            return JobOutcome::Failed;
        }

        let container_id = match self
            .executor
            .run_job(&job.image, &job.script, workspace, env)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(job = %job.name, error = %e, "failed to start job container");
                self.sink.append_job_line(job_id, &format!("{e}")).await;
                self.sink.flush_job(job_id).await;
                self.set_job_status(job_id, JobStatus::Failed, Some(1)).await;
                return JobOutcome::Failed;
            }
        };

        let pump = match self.executor.follow_logs(&container_id).await {
            Ok(stream) => Some(spawn_log_pump(job_id, stream, self.sink.clone())),
            Err(e) => {
                warn!(job = %job.name, error = %e, "failed to follow container logs");
                None
            }
        };

        let exit_code = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(job = %job.name, "cancelled, removing active container");
                if let Err(e) = self.executor.remove_container(&container_id).await {
                    warn!(error = %e, "failed to remove cancelled container");
                }
                if let Some(pump) = pump {
                    pump.abort();
                }
                self.sink.flush_job(job_id).await;
                return JobOutcome::Cancelled;
            }
            result = self.executor.wait_for_exit(&container_id) => match result {
                Ok(code) => code,
                Err(e) => {
                    error!(job = %job.name, error = %e, "failed waiting for container");
                    self.sink.append_job_line(job_id, &format!("{e}")).await;
                    1
                }
            }
        };

        // The log stream closes when the container exits; wait for the
        // pump so the final batch lands before the status flips.
        if let Some(pump) = pump {
            let _ = pump.await;
        }

        if let Err(e) = self.executor.remove_container(&container_id).await {
            warn!(container = %container_id, error = %e, "failed to remove job container");
        }

        if exit_code == 0 {
            self.set_job_status(job_id, JobStatus::Success, Some(0)).await;
            info!(job = %job.name, "job completed");
            JobOutcome::Success
        } else {
            self.set_job_status(job_id, JobStatus::Failed, Some(exit_code))
                .await;
            error!(job = %job.name, exit_code, "job failed, aborting pipeline");
            JobOutcome::Failed
        }
    }

    async fn run_deployment(
        &self,
        request: &RunRequest,
        workspace: &std::path::Path,
    ) -> DeploymentStatus {
        info!(
            pipeline = %request.pipeline_id,
            file = %request.deployment_filename,
            "pipeline green, starting deployment"
        );

        let log = DeployLog::new(self.sink.clone(), request.pipeline_id);
        self.set_deployment_status(request.pipeline_id, DeploymentStatus::Deploying)
            .await;

        let status = match self.deployer.deploy(request, workspace, &log).await {
            Ok(()) => {
                log.line("Deployment successful").await;
                DeploymentStatus::Success
            }
            Err(e) => {
                error!(error = %e, "deployment failed");
                log.line(format!("Deployment failed: {e}")).await;
                match self.rollback.recover(&self.deployer, request, &log).await {
                    RecoveryOutcome::RolledBack => DeploymentStatus::RolledBack,
                    RecoveryOutcome::Failed => DeploymentStatus::Failed,
                }
            }
        };

        self.set_deployment_status(request.pipeline_id, status).await;
        status
    }

    // ---- store plumbing; every failure is logged and swallowed ----

    /// Creates the job records up front, returning one id per planned job
    async fn record_plan(&self, request: &RunRequest, plan: &[PlannedJob]) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(plan.len());
        for job in plan {
            let id = match &self.store {
                Some(store) => match store
                    .create_job(request.pipeline_id, &job.name, &job.stage, &job.image)
                    .await
                {
                    Ok(record) => record.id,
                    Err(e) => {
                        error!(job = %job.name, error = %e, "failed to create job record");
                        Uuid::new_v4()
                    }
                },
                None => Uuid::new_v4(),
            };
            ids.push(id);
        }
        ids
    }

    /// Project variables merged with the engine-provided ones
    async fn compose_env(&self, request: &RunRequest) -> Vec<String> {
        let mut env = Vec::new();

        if let Some(store) = &self.store {
            match store.variables(request.project_id).await {
                Ok(variables) => {
                    for variable in variables {
                        env.push(format!("{}={}", variable.key, variable.value));
                    }
                }
                Err(e) => error!(error = %e, "failed to fetch project variables"),
            }
        }

        env.push(format!("CI_COMMIT_SHA={}", request.commit_hash));
        env.push(format!("CI_COMMIT_SHORT_SHA={}", request.commit_short()));
        env.push(format!("CI_BRANCH={}", request.branch));
        env.push(format!("CI_PIPELINE_ID={}", request.pipeline_id));
        env.push(format!(
            "CI_PROJECT_NAME={}",
            sanitize_project_name(&request.repo_name)
        ));
        env
    }

    async fn set_pipeline_status(&self, pipeline_id: Uuid, status: PipelineStatus) {
        if let Some(store) = &self.store {
            if let Err(e) = store.update_pipeline_status(pipeline_id, status).await {
                error!(pipeline = %pipeline_id, error = %e, "failed to update pipeline status");
            }
        }
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus, exit_code: Option<i64>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.update_job_status(job_id, status, exit_code).await {
                error!(job = %job_id, error = %e, "failed to update job status");
            }
        }
    }

    async fn create_pending_deployment(&self, pipeline_id: Uuid) {
        if let Some(store) = &self.store {
            if let Err(e) = store.create_pending_deployment(pipeline_id).await {
                error!(pipeline = %pipeline_id, error = %e, "failed to create deployment record");
            }
        }
    }

    async fn set_deployment_status(&self, pipeline_id: Uuid, status: DeploymentStatus) {
        let Some(store) = &self.store else { return };
        let deployment = match store.deployment_by_pipeline(pipeline_id).await {
            Ok(Some(deployment)) => deployment,
            Ok(None) => return,
            Err(e) => {
                error!(pipeline = %pipeline_id, error = %e, "failed to look up deployment");
                return;
            }
        };
        if let Err(e) = store.update_deployment_status(deployment.id, status).await {
            error!(deployment = %deployment.id, error = %e, "failed to update deployment status");
        }
    }

    /// A pipeline that never reached its deployment leaves the pre-created
    /// record `pending`; close it out as failed
    async fn fail_pending_deployment(&self, pipeline_id: Uuid) {
        let Some(store) = &self.store else { return };
        match store.deployment_by_pipeline(pipeline_id).await {
            Ok(Some(deployment)) if deployment.status == DeploymentStatus::Pending => {
                if let Err(e) = store
                    .update_deployment_status(deployment.id, DeploymentStatus::Failed)
                    .await
                {
                    error!(deployment = %deployment.id, error = %e, "failed to fail pending deployment");
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(pipeline = %pipeline_id, error = %e, "failed to look up deployment");
            }
        }
    }
}

/// Pumps a container's log stream into the sink
///
/// Demultiplexed chunks become sanitized lines; the trailing batch is
/// flushed when the stream closes with the container's exit.
fn spawn_log_pump(
    job_id: Uuid,
    mut stream: LogStream,
    sink: Arc<dyn LogSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut assembler = LineAssembler::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in assembler.push(&chunk.data) {
                        sink.append_job_line(job_id, &line).await;
                    }
                }
                Err(e) => {
                    warn!(job = %job_id, error = %e, "log stream error");
                    break;
                }
            }
        }

        if let Some(line) = assembler.finish() {
            sink.append_job_line(job_id, &line).await;
        }
        sink.flush_job(job_id).await;
    })
}
