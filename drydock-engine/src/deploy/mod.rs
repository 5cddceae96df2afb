//! Deployment engine
//!
//! Runs after a fully green pipeline. Two flows:
//!
//! - **remote** (registry + ssh configured): generate an override pinning
//!   buildable services to commit-tagged images, build and push them, then
//!   copy the compose files and a deploy script to the host and run it
//!   with line-streamed output.
//! - **local** (everything else): snapshot the running stack's images,
//!   `compose pull` + `up -d --build`, gate on service health, and restore
//!   the snapshot tags if anything goes wrong.
//!
//! Deployment errors never escape the runner as panics or process exits;
//! they become a deployment status and feed the rollback driver.

pub mod health;
pub mod rollback;
pub mod script;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use drydock_core::config::compose::{generate_override, ComposeFile, OVERRIDE_FILENAME};
use drydock_core::names::sanitize_project_name;
use drydock_core::request::RunRequest;
use drydock_core::{Error, Result};

use crate::config::EngineConfig;
use crate::executor::ContainerExecutor;
use crate::shell::ShellDialer;
use crate::sink::DeployLog;

use health::HealthGate;
use script::DEPLOY_SCRIPT;

pub use rollback::{RecoveryOutcome, RollbackDriver};

/// Image snapshot of the running stack: `(image_name, image_id)` pairs
type StackSnapshot = Vec<(String, String)>;

const ROLLBACK_TAG_SUFFIX: &str = "-rollback";

/// Drives one deployment of a checked-out workspace
pub struct DeploymentEngine {
    executor: Arc<dyn ContainerExecutor>,
    dialer: Arc<dyn ShellDialer>,
    config: EngineConfig,
}

impl DeploymentEngine {
    pub fn new(
        executor: Arc<dyn ContainerExecutor>,
        dialer: Arc<dyn ShellDialer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor,
            dialer,
            config,
        }
    }

    /// Deploys the workspace, selecting the flow from the request
    pub async fn deploy(
        &self,
        request: &RunRequest,
        workspace: &Path,
        log: &DeployLog,
    ) -> Result<()> {
        if request.uses_remote_deploy() {
            log.line("Using registry/ssh deployment flow").await;
            self.deploy_remote(request, workspace, log).await
        } else {
            log.line("Using local deployment flow").await;
            self.deploy_local(request, workspace, log).await
        }
    }

    // ---- remote flow ----

    async fn deploy_remote(
        &self,
        request: &RunRequest,
        workspace: &Path,
        log: &DeployLog,
    ) -> Result<()> {
        let compose_path = workspace.join(&request.deployment_filename);
        let compose = ComposeFile::load(&compose_path)?;
        let services = compose.buildable_services();
        let project = sanitize_project_name(&request.repo_name);

        let override_bytes = generate_override(
            &services,
            &request.registry_user,
            &request.repo_name,
            &request.commit_hash,
        )?;
        tokio::fs::write(workspace.join(OVERRIDE_FILENAME), &override_bytes).await?;
        log.line(format!("Generated {OVERRIDE_FILENAME}")).await;

        self.executor
            .registry_login(&request.registry_user, &request.registry_token, "")
            .await?;
        log.line(format!("Logged in to registry as {}", request.registry_user))
            .await;

        log.line("Building images...").await;
        let build = self
            .executor
            .compose_build(workspace, &request.deployment_filename, Some(OVERRIDE_FILENAME))
            .await?;
        log.block("BUILD LOGS", &build.output).await;
        if !build.success() {
            return Err(Error::Deploy(format!(
                "compose build exited with {}",
                build.exit_code
            )));
        }

        log.line("Pushing images...").await;
        let push = self
            .executor
            .compose_push(workspace, &request.deployment_filename, Some(OVERRIDE_FILENAME))
            .await?;
        log.block("PUSH LOGS", &push.output).await;
        if !push.success() {
            return Err(Error::Registry(format!(
                "compose push exited with {}",
                push.exit_code
            )));
        }

        let shell = self
            .dialer
            .dial(&request.ssh_host, &request.ssh_user, &request.ssh_private_key)
            .await?;
        log.line(format!("Connected via SSH to {}", request.ssh_host))
            .await;

        let remote_dir = format!("deploy/{project}");
        shell.run(&format!("mkdir -p {remote_dir}")).await?;

        let compose_bytes = tokio::fs::read(&compose_path).await?;
        shell
            .copy(
                &compose_bytes,
                &format!("{remote_dir}/{}", request.deployment_filename),
            )
            .await?;
        shell
            .copy(&override_bytes, &format!("{remote_dir}/{OVERRIDE_FILENAME}"))
            .await?;
        log.line(format!("Copied config files to remote dir: {remote_dir}"))
            .await;

        shell
            .copy(DEPLOY_SCRIPT.as_bytes(), &format!("{remote_dir}/deploy.sh"))
            .await?;
        shell.run(&format!("chmod +x {remote_dir}/deploy.sh")).await?;

        // Non-interactive shells on minimal hosts often miss the docker
        // binary from PATH.
        let command = format!(
            "export PATH=$PATH:/usr/local/bin:/usr/bin && cd {remote_dir} && ./deploy.sh {project} {} {OVERRIDE_FILENAME}",
            request.deployment_filename
        );

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let stream = shell.run_streamed(&command, tx);
        let drain = async {
            while let Some(line) = rx.recv().await {
                log.line(line).await;
            }
        };
        let (result, ()) = tokio::join!(stream, drain);

        result.map_err(|e| {
            Error::Remote(format!("remote deploy script failed: {e}"))
        })
    }

    // ---- local flow ----

    async fn deploy_local(
        &self,
        request: &RunRequest,
        workspace: &Path,
        log: &DeployLog,
    ) -> Result<()> {
        let project = sanitize_project_name(&request.repo_name);
        let compose_file = &request.deployment_filename;

        // Hardcoded container names bypass compose's project scoping and
        // are what the name-conflict retry below usually trips over.
        if let Ok(compose) = ComposeFile::load(&workspace.join(compose_file)) {
            let names = compose.container_names();
            if !names.is_empty() {
                log.line(format!(
                    "Compose file pins container names: {}",
                    names.join(", ")
                ))
                .await;
            }
        }

        let snapshot = self.snapshot_stack(&project).await;

        let pull = self
            .executor
            .compose_pull(workspace, compose_file, &project)
            .await?;
        log.block("PULL LOGS", &pull.output).await;
        if !pull.success() {
            // Nothing was recreated yet; leave the stack as it is.
            return Err(Error::Deploy(format!(
                "compose pull exited with {}",
                pull.exit_code
            )));
        }

        let mut up = self
            .executor
            .compose_up(workspace, compose_file, &project, true, false)
            .await?;
        log.block("COMPOSE UP", &up.output).await;

        if !up.success() {
            if let Some(conflict_id) = extract_conflict_id(&up.output) {
                log.line(format!(
                    "Detected name conflict with container {conflict_id}, removing and retrying"
                ))
                .await;
                if let Err(e) = self.executor.remove_container(&conflict_id).await {
                    warn!(container = %conflict_id, error = %e, "failed to remove conflicting container");
                }
                up = self
                    .executor
                    .compose_up(workspace, compose_file, &project, true, false)
                    .await?;
                log.block("COMPOSE UP (RETRY)", &up.output).await;
            }
        }

        if !up.success() {
            self.restore_snapshot(&snapshot, workspace, compose_file, &project, log)
                .await;
            return Err(Error::Deploy(format!(
                "compose up exited with {}",
                up.exit_code
            )));
        }

        let gate = HealthGate {
            poll_interval: self.config.health_poll_interval,
            deadline: self.config.health_deadline,
        };
        match gate
            .wait(self.executor.as_ref(), workspace, compose_file, &project, log)
            .await
        {
            Ok(()) => {
                self.discard_snapshot(&snapshot).await;
                Ok(())
            }
            Err(e) => {
                log.line(format!("Health check failed: {e}")).await;
                self.restore_snapshot(&snapshot, workspace, compose_file, &project, log)
                    .await;
                Err(e)
            }
        }
    }

    /// Records `(image_name, image_id)` for every container in the project
    /// and tags each image id as `<name>-rollback`, best effort
    async fn snapshot_stack(&self, project: &str) -> StackSnapshot {
        let containers = match self.executor.list_project_containers(project).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(project, error = %e, "failed to snapshot running stack");
                return Vec::new();
            }
        };

        let mut snapshot = Vec::new();
        for container in containers {
            if container.image_name.is_empty() {
                continue;
            }
            let backup_tag = format!("{}{}", container.image_name, ROLLBACK_TAG_SUFFIX);
            if let Err(e) = self.executor.tag_image(&container.image_id, &backup_tag).await {
                warn!(image = %container.image_name, error = %e, "failed to create backup tag");
            }
            snapshot.push((container.image_name, container.image_id));
        }
        info!(project, images = snapshot.len(), "captured stack snapshot");
        snapshot
    }

    /// Restores snapshot tags and force-recreates the stack, best effort
    async fn restore_snapshot(
        &self,
        snapshot: &StackSnapshot,
        workspace: &Path,
        compose_file: &str,
        project: &str,
        log: &DeployLog,
    ) {
        if snapshot.is_empty() {
            log.line("No backup available for rollback").await;
            return;
        }
        log.line("Performing rollback...").await;

        for (image_name, image_id) in snapshot {
            if let Err(e) = self.executor.tag_image(image_id, image_name).await {
                log.line(format!("Error restoring tag {image_name}: {e}")).await;
            }
        }

        match self
            .executor
            .compose_up(workspace, compose_file, project, false, true)
            .await
        {
            Ok(up) if up.success() => {
                log.line("Rollback successful").await;
            }
            Ok(up) => {
                log.line(format!("Rollback failed: {}", up.output.trim())).await;
            }
            Err(e) => {
                log.line(format!("Rollback failed: {e}")).await;
            }
        }
    }

    /// Drops the `-rollback` tags after a healthy deploy
    async fn discard_snapshot(&self, snapshot: &StackSnapshot) {
        for (image_name, _) in snapshot {
            let backup_tag = format!("{image_name}{ROLLBACK_TAG_SUFFIX}");
            if let Err(e) = self.executor.remove_image(&backup_tag).await {
                warn!(tag = %backup_tag, error = %e, "failed to remove backup tag");
            }
        }
    }
}

/// Pulls the conflicting container id out of a compose name-conflict error
///
/// The daemon phrases it as:
/// `... name "/x" is already in use by container "<id>". You have to ...`
fn extract_conflict_id(output: &str) -> Option<String> {
    let (_, rest) = output.split_once("already in use by container \"")?;
    let (id, _) = rest.split_once('"')?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
