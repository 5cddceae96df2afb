#![allow(dead_code)]

//! In-memory fakes for the capability interfaces
//!
//! The fakes are scripted: tests load behaviors (exit codes, raw
//! multiplexed log bytes, compose results) up front, run the pipeline,
//! and assert on what was recorded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use drydock_core::domain::{
    Deployment, DeploymentStatus, Job, JobStatus, Pipeline, PipelineStatus, Project, Variable,
};
use drydock_core::request::RunRequest;
use drydock_core::store::Store;
use drydock_core::{Error, Result};
use drydock_engine::config::EngineConfig;
use drydock_engine::executor::{
    encode_frame, ComposeOutput, ContainerExecutor, FrameDecoder, LogStream, ProjectContainer,
    ServiceState, StreamKind,
};
use drydock_engine::fetch::{Checkout, SourceFetcher};
use drydock_engine::runner::PipelineRunner;
use drydock_engine::shell::{RemoteShell, ShellDialer};

// ---- executor fake ----

/// Scripted behavior for the next job container
pub struct JobBehavior {
    pub exit_code: i64,
    /// Raw multiplexed stream bytes, exactly as the engine would emit them
    pub log_bytes: Vec<u8>,
    /// Never exit; used to exercise cancellation
    pub hang: bool,
}

impl JobBehavior {
    pub fn succeed_with(lines: &[&str]) -> Self {
        Self::exit_with(0, lines)
    }

    pub fn exit_with(exit_code: i64, lines: &[&str]) -> Self {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend(encode_frame(
                StreamKind::Stdout,
                format!("{line}\n").as_bytes(),
            ));
        }
        Self {
            exit_code,
            log_bytes: bytes,
            hang: false,
        }
    }

    pub fn hanging() -> Self {
        Self {
            exit_code: 0,
            log_bytes: Vec::new(),
            hang: true,
        }
    }
}

#[derive(Clone)]
pub struct RunRecord {
    pub image: String,
    pub script: Vec<String>,
    pub env: Vec<String>,
    pub workspace: String,
}

struct ContainerState {
    exit_code: i64,
    log_bytes: Vec<u8>,
    hang: bool,
}

#[derive(Default)]
pub struct ExecState {
    pub fail_pull: HashSet<String>,
    pub fail_login: bool,
    behaviors: VecDeque<JobBehavior>,
    containers: HashMap<String, ContainerState>,
    next_container: usize,

    pub pulled_images: Vec<String>,
    pub jobs_run: Vec<RunRecord>,
    pub removed_containers: Vec<String>,
    pub logins: Vec<String>,
    pub tags: Vec<(String, String)>,
    pub removed_images: Vec<String>,

    pub project_containers: Vec<ProjectContainer>,
    pub services: Vec<String>,
    /// Report services as `starting` unless the work dir is a rollback
    /// workspace; drives the health-timeout scenario
    pub starting_unless_rollback: bool,

    pub build_results: VecDeque<ComposeOutput>,
    pub push_results: VecDeque<ComposeOutput>,
    pub pull_results: VecDeque<ComposeOutput>,
    pub up_results: VecDeque<ComposeOutput>,

    pub build_calls: Vec<Option<String>>,
    pub push_calls: Vec<Option<String>>,
    pub pull_calls: Vec<String>,
    pub up_calls: Vec<UpCall>,
}

#[derive(Clone)]
pub struct UpCall {
    pub work_dir: String,
    pub project: String,
    pub build: bool,
    pub force_recreate: bool,
}

pub struct FakeExecutor {
    pub state: Mutex<ExecState>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ExecState::default()),
        })
    }

    pub fn push_job(&self, behavior: JobBehavior) {
        self.state.lock().unwrap().behaviors.push_back(behavior);
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut ExecState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

pub fn ok_output() -> ComposeOutput {
    ComposeOutput {
        output: String::new(),
        exit_code: 0,
    }
}

pub fn failed_output(message: &str) -> ComposeOutput {
    ComposeOutput {
        output: message.to_string(),
        exit_code: 1,
    }
}

fn pop_or_ok(queue: &mut VecDeque<ComposeOutput>) -> ComposeOutput {
    queue.pop_front().unwrap_or_else(ok_output)
}

#[async_trait]
impl ContainerExecutor for FakeExecutor {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pulled_images.push(image.to_string());
        if state.fail_pull.contains(image) {
            return Err(Error::Image {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }

    async fn run_job(
        &self,
        image: &str,
        script: &[String],
        workspace: &Path,
        env: &[String],
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.jobs_run.push(RunRecord {
            image: image.to_string(),
            script: script.to_vec(),
            env: env.to_vec(),
            workspace: workspace.to_string_lossy().into_owned(),
        });

        let behavior = state
            .behaviors
            .pop_front()
            .unwrap_or_else(|| JobBehavior::succeed_with(&[]));
        state.next_container += 1;
        let id = format!("ctr-{}", state.next_container);
        state.containers.insert(
            id.clone(),
            ContainerState {
                exit_code: behavior.exit_code,
                log_bytes: behavior.log_bytes,
                hang: behavior.hang,
            },
        );
        Ok(id)
    }

    async fn follow_logs(&self, container_id: &str) -> Result<LogStream> {
        let bytes = {
            let state = self.state.lock().unwrap();
            state
                .containers
                .get(container_id)
                .map(|c| c.log_bytes.clone())
                .unwrap_or_default()
        };

        // Feed the raw framed bytes through the real decoder, exactly the
        // contract a daemon-backed stream satisfies.
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let chunks: Vec<_> = decoder.drain_frames().into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn wait_for_exit(&self, container_id: &str) -> Result<i64> {
        let (code, hang) = {
            let state = self.state.lock().unwrap();
            let container = state
                .containers
                .get(container_id)
                .ok_or_else(|| Error::Engine("unknown container".to_string()))?;
            (container.exit_code, container.hang)
        };
        if hang {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        Ok(code)
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .removed_containers
            .push(container_id.to_string());
        Ok(())
    }

    async fn registry_login(&self, user: &str, _token: &str, _server: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.logins.push(user.to_string());
        if state.fail_login {
            return Err(Error::Registry("invalid credentials".to_string()));
        }
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .tags
            .push((source.to_string(), target.to_string()));
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .removed_images
            .push(image.to_string());
        Ok(())
    }

    async fn list_project_containers(&self, _project: &str) -> Result<Vec<ProjectContainer>> {
        Ok(self.state.lock().unwrap().project_containers.clone())
    }

    async fn compose_build(
        &self,
        _work_dir: &Path,
        _compose_file: &str,
        override_file: Option<&str>,
    ) -> Result<ComposeOutput> {
        let mut state = self.state.lock().unwrap();
        state.build_calls.push(override_file.map(str::to_string));
        Ok(pop_or_ok(&mut state.build_results))
    }

    async fn compose_push(
        &self,
        _work_dir: &Path,
        _compose_file: &str,
        override_file: Option<&str>,
    ) -> Result<ComposeOutput> {
        let mut state = self.state.lock().unwrap();
        state.push_calls.push(override_file.map(str::to_string));
        Ok(pop_or_ok(&mut state.push_results))
    }

    async fn compose_pull(
        &self,
        work_dir: &Path,
        _compose_file: &str,
        _project: &str,
    ) -> Result<ComposeOutput> {
        let mut state = self.state.lock().unwrap();
        state.pull_calls.push(work_dir.to_string_lossy().into_owned());
        Ok(pop_or_ok(&mut state.pull_results))
    }

    async fn compose_up(
        &self,
        work_dir: &Path,
        _compose_file: &str,
        project: &str,
        build: bool,
        force_recreate: bool,
    ) -> Result<ComposeOutput> {
        let mut state = self.state.lock().unwrap();
        state.up_calls.push(UpCall {
            work_dir: work_dir.to_string_lossy().into_owned(),
            project: project.to_string(),
            build,
            force_recreate,
        });
        Ok(pop_or_ok(&mut state.up_results))
    }

    async fn compose_services(
        &self,
        _work_dir: &Path,
        _compose_file: &str,
        _project: &str,
    ) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().services.clone())
    }

    async fn compose_ps(
        &self,
        work_dir: &Path,
        _compose_file: &str,
        _project: &str,
    ) -> Result<Vec<ServiceState>> {
        let state = self.state.lock().unwrap();
        let in_rollback = work_dir.to_string_lossy().contains("-rollback-");
        let health = if state.starting_unless_rollback && !in_rollback {
            "starting"
        } else {
            "healthy"
        };
        Ok(state
            .services
            .iter()
            .map(|service| ServiceState {
                service: service.clone(),
                state: "running".to_string(),
                health: health.to_string(),
            })
            .collect())
    }
}

// ---- fetcher fake ----

pub struct FakeFetcher {
    pub files: HashMap<String, String>,
    pub fail: bool,
    pub checkouts: Mutex<Vec<Checkout>>,
}

impl FakeFetcher {
    pub fn with_files(files: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fail: false,
            checkouts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            files: HashMap::new(),
            fail: true,
            checkouts: Mutex::new(Vec::new()),
        })
    }

    pub fn checkouts(&self) -> Vec<Checkout> {
        self.checkouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, checkout: &Checkout, dest: &Path) -> Result<()> {
        self.checkouts.lock().unwrap().push(checkout.clone());
        if self.fail {
            return Err(Error::Fetch("repository not found".to_string()));
        }
        for (name, content) in &self.files {
            std::fs::write(dest.join(name), content)?;
        }
        Ok(())
    }
}

// ---- remote shell fake ----

#[derive(Default)]
pub struct ShellRecord {
    pub commands: Vec<String>,
    pub copies: Vec<(String, Vec<u8>)>,
    pub streamed_commands: Vec<String>,
    pub stream_lines: Vec<String>,
    pub fail_stream: bool,
}

pub struct FakeDialer {
    pub record: Arc<Mutex<ShellRecord>>,
    pub dials: Mutex<Vec<String>>,
}

impl FakeDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            record: Arc::new(Mutex::new(ShellRecord::default())),
            dials: Mutex::new(Vec::new()),
        })
    }

    pub fn with_record<T>(&self, f: impl FnOnce(&mut ShellRecord) -> T) -> T {
        f(&mut self.record.lock().unwrap())
    }
}

struct FakeShell {
    record: Arc<Mutex<ShellRecord>>,
}

#[async_trait]
impl ShellDialer for FakeDialer {
    async fn dial(
        &self,
        host: &str,
        _user: &str,
        _private_key: &str,
    ) -> Result<Box<dyn RemoteShell>> {
        self.dials.lock().unwrap().push(host.to_string());
        Ok(Box::new(FakeShell {
            record: self.record.clone(),
        }))
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn run(&self, command: &str) -> Result<String> {
        self.record.lock().unwrap().commands.push(command.to_string());
        Ok(String::new())
    }

    async fn copy(&self, content: &[u8], remote_path: &str) -> Result<()> {
        self.record
            .lock()
            .unwrap()
            .copies
            .push((remote_path.to_string(), content.to_vec()));
        Ok(())
    }

    async fn run_streamed(&self, command: &str, lines: mpsc::Sender<String>) -> Result<()> {
        let (emit, fail) = {
            let mut record = self.record.lock().unwrap();
            record.streamed_commands.push(command.to_string());
            (record.stream_lines.clone(), record.fail_stream)
        };
        for line in emit {
            let _ = lines.send(line).await;
        }
        if fail {
            return Err(Error::Remote("remote command exited with 1".to_string()));
        }
        Ok(())
    }
}

// ---- store fake ----

#[derive(Default)]
pub struct StoreState {
    pub pipelines: Vec<Pipeline>,
    pub jobs: Vec<Job>,
    pub deployments: Vec<Deployment>,
    pub job_logs: HashMap<Uuid, Vec<String>>,
    pub deployment_logs: Vec<String>,
    pub variables: Vec<Variable>,
    seq: usize,
    pub job_start_seq: HashMap<Uuid, usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_pipeline(&self, pipeline: Pipeline) {
        self.state.lock().unwrap().pipelines.push(pipeline);
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn pipeline_status(&self, id: Uuid) -> Option<PipelineStatus> {
        self.with_state(|s| s.pipelines.iter().find(|p| p.id == id).map(|p| p.status))
    }

    pub fn job(&self, pipeline_id: Uuid, name: &str) -> Option<Job> {
        self.with_state(|s| {
            s.jobs
                .iter()
                .find(|j| j.pipeline_id == pipeline_id && j.name == name)
                .cloned()
        })
    }

    pub fn deployment_status(&self, pipeline_id: Uuid) -> Option<DeploymentStatus> {
        self.with_state(|s| {
            s.deployments
                .iter()
                .find(|d| d.pipeline_id == pipeline_id)
                .map(|d| d.status)
        })
    }

    pub fn deployment_logs(&self) -> Vec<String> {
        self.with_state(|s| s.deployment_logs.clone())
    }

    pub fn job_logs(&self, job_id: Uuid) -> Vec<String> {
        self.with_state(|s| s.job_logs.get(&job_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn project(&self, _id: Uuid) -> Result<Option<Project>> {
        Ok(None)
    }

    async fn project_by_repo_url(&self, _repo_url: &str) -> Result<Option<Project>> {
        Ok(None)
    }

    async fn create_pipeline(
        &self,
        project_id: Uuid,
        branch: &str,
        commit: &str,
    ) -> Result<Pipeline> {
        let pipeline = Pipeline {
            id: Uuid::new_v4(),
            project_id,
            status: PipelineStatus::Pending,
            commit_hash: commit.to_string(),
            branch: branch.to_string(),
            created_at: chrono::Utc::now(),
            finished_at: None,
        };
        self.seed_pipeline(pipeline.clone());
        Ok(pipeline)
    }

    async fn update_pipeline_status(&self, id: Uuid, status: PipelineStatus) -> Result<()> {
        self.with_state(|s| {
            if let Some(pipeline) = s.pipelines.iter_mut().find(|p| p.id == id) {
                pipeline.status = status;
                if status.is_terminal() {
                    pipeline.finished_at = Some(chrono::Utc::now());
                }
            }
        });
        Ok(())
    }

    async fn last_successful_pipeline(&self, project_id: Uuid) -> Result<Option<Pipeline>> {
        Ok(self.with_state(|s| {
            s.pipelines
                .iter()
                .rev()
                .find(|p| {
                    p.project_id == project_id
                        && p.status == PipelineStatus::Success
                        && !p.commit_hash.is_empty()
                })
                .cloned()
        }))
    }

    async fn create_job(
        &self,
        pipeline_id: Uuid,
        name: &str,
        stage: &str,
        image: &str,
    ) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            pipeline_id,
            name: name.to_string(),
            stage: stage.to_string(),
            image: image.to_string(),
            status: JobStatus::Pending,
            exit_code: None,
            started_at: None,
            finished_at: None,
        };
        self.with_state(|s| s.jobs.push(job.clone()));
        Ok(job)
    }

    async fn job_by_name(&self, pipeline_id: Uuid, name: &str) -> Result<Option<Job>> {
        Ok(self.job(pipeline_id, name))
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i64>,
    ) -> Result<()> {
        self.with_state(|s| {
            s.seq += 1;
            let seq = s.seq;
            if status == JobStatus::Running {
                s.job_start_seq.insert(id, seq);
            }
            if let Some(job) = s.jobs.iter_mut().find(|j| j.id == id) {
                job.status = status;
                if let Some(code) = exit_code {
                    job.exit_code = Some(code);
                }
                let now = chrono::Utc::now();
                if status == JobStatus::Running {
                    job.started_at = Some(now);
                }
                if status.is_terminal() {
                    job.finished_at = Some(now);
                }
            }
        });
        Ok(())
    }

    async fn append_job_logs(&self, job_id: Uuid, lines: &[String]) -> Result<()> {
        self.with_state(|s| {
            s.job_logs
                .entry(job_id)
                .or_default()
                .extend(lines.iter().cloned())
        });
        Ok(())
    }

    async fn create_pending_deployment(&self, pipeline_id: Uuid) -> Result<Deployment> {
        let deployment = Deployment {
            id: Uuid::new_v4(),
            pipeline_id,
            status: DeploymentStatus::Pending,
            started_at: None,
            finished_at: None,
        };
        self.with_state(|s| s.deployments.push(deployment.clone()));
        Ok(deployment)
    }

    async fn deployment_by_pipeline(&self, pipeline_id: Uuid) -> Result<Option<Deployment>> {
        Ok(self.with_state(|s| {
            s.deployments
                .iter()
                .find(|d| d.pipeline_id == pipeline_id)
                .cloned()
        }))
    }

    async fn update_deployment_status(&self, id: Uuid, status: DeploymentStatus) -> Result<()> {
        self.with_state(|s| {
            if let Some(deployment) = s.deployments.iter_mut().find(|d| d.id == id) {
                deployment.status = status;
                if status.is_terminal() {
                    deployment.finished_at = Some(chrono::Utc::now());
                }
            }
        });
        Ok(())
    }

    async fn append_deployment_log(&self, _pipeline_id: Uuid, line: &str) -> Result<()> {
        self.with_state(|s| s.deployment_logs.push(line.to_string()));
        Ok(())
    }

    async fn variables(&self, project_id: Uuid) -> Result<Vec<Variable>> {
        Ok(self.with_state(|s| {
            s.variables
                .iter()
                .filter(|v| v.project_id == project_id)
                .cloned()
                .collect()
        }))
    }
}

// ---- harness ----

pub const PIPELINE_YAML: &str = "\
stages: [build, test]

b:
  stage: build
  image: alpine
  script: [echo hi]

t:
  stage: test
  image: alpine
  script: ['true']
";

pub const COMPOSE_YAML: &str = "\
services:
  web:
    build: .
  db:
    image: postgres:16
";

pub struct Harness {
    pub executor: Arc<FakeExecutor>,
    pub fetcher: Arc<FakeFetcher>,
    pub dialer: Arc<FakeDialer>,
    pub store: Arc<MemoryStore>,
    pub request: RunRequest,
    pub root: tempfile::TempDir,
    config: EngineConfig,
}

impl Harness {
    /// Harness around a project with the default fixture files
    pub fn new() -> Self {
        Self::with_files(&[
            ("pipeline.yml", PIPELINE_YAML),
            ("docker-compose.yml", COMPOSE_YAML),
        ])
    }

    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let executor = FakeExecutor::new();
        let fetcher = FakeFetcher::with_files(files);
        Self::assemble(executor, fetcher)
    }

    pub fn with_fetcher(fetcher: Arc<FakeFetcher>) -> Self {
        Self::assemble(FakeExecutor::new(), fetcher)
    }

    fn assemble(executor: Arc<FakeExecutor>, fetcher: Arc<FakeFetcher>) -> Self {
        let dialer = FakeDialer::new();
        let store = MemoryStore::new();
        let root = tempfile::tempdir().expect("tempdir");

        let config = EngineConfig {
            workspace_root: root.path().to_path_buf(),
            log_batch_size: 10,
            health_poll_interval: std::time::Duration::from_millis(10),
            health_deadline: std::time::Duration::from_millis(50),
        };

        let project_id = Uuid::new_v4();
        let pipeline_id = Uuid::new_v4();
        store.seed_pipeline(Pipeline {
            id: pipeline_id,
            project_id,
            status: PipelineStatus::Pending,
            commit_hash: "abc12345ff00".to_string(),
            branch: "main".to_string(),
            created_at: chrono::Utc::now(),
            finished_at: None,
        });

        let request = RunRequest {
            repo_url: "git@host:acme/app.git".to_string(),
            repo_name: "app".to_string(),
            branch: "main".to_string(),
            commit_hash: "abc12345ff00".to_string(),
            access_token: String::new(),
            pipeline_filename: "pipeline.yml".to_string(),
            deployment_filename: "docker-compose.yml".to_string(),
            ssh_host: String::new(),
            ssh_user: String::new(),
            ssh_private_key: String::new(),
            registry_user: String::new(),
            registry_token: String::new(),
            project_id,
            pipeline_id,
        };

        Self {
            executor,
            fetcher,
            dialer,
            store,
            request,
            root,
            config,
        }
    }

    /// Switches the request to the remote flow
    pub fn remote(mut self) -> Self {
        self.request.registry_user = "acme".to_string();
        self.request.registry_token = "secret".to_string();
        self.request.ssh_host = "10.0.0.5:22".to_string();
        self.request.ssh_user = "deploy".to_string();
        self.request.ssh_private_key = "-----BEGIN KEY-----".to_string();
        self
    }

    pub fn runner(&self) -> PipelineRunner {
        PipelineRunner::new(
            self.executor.clone(),
            self.fetcher.clone(),
            self.dialer.clone(),
            Some(self.store.clone()),
            self.config.clone(),
        )
    }

    pub async fn run(&self) -> PipelineStatus {
        self.runner()
            .run(
                self.request.clone(),
                tokio_util::sync::CancellationToken::new(),
            )
            .await
    }

    /// The workspace root must hold no leftover run directories
    pub fn assert_workspaces_released(&self) {
        let dir = self.root.path().join("cicd-workspaces");
        if dir.exists() {
            let leftovers: Vec<_> = std::fs::read_dir(&dir)
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            assert!(leftovers.is_empty(), "workspaces not released: {leftovers:?}");
        }
    }
}
