//! Docker-backed container executor
//!
//! Engine operations (pull, run, logs, wait, tag) go through the Docker
//! API. Compose and registry login shell out to the `docker` CLI instead:
//! override merging, profiles, and healthcheck aggregation are compose
//! semantics we treat as an opaque external tool, and a CLI login leaves
//! credentials where spawned compose processes find them.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{CreateImageOptions, RemoveImageOptions, TagImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use drydock_core::{Error, Result};

use super::{
    parse_compose_ps, ComposeOutput, ContainerExecutor, LogChunk, LogStream, ProjectContainer,
    ServiceState, StreamKind,
};

/// Mount point of the run workspace inside job containers
const WORKSPACE_MOUNT: &str = "/workspace";

/// Container executor backed by the local Docker daemon
pub struct DockerExecutor {
    docker: Docker,
}

impl DockerExecutor {
    /// Connects using the standard environment (`DOCKER_HOST` or the
    /// default socket)
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Engine(format!("failed to connect to docker daemon: {e}")))?;
        Ok(Self { docker })
    }

    async fn compose(&self, work_dir: &Path, args: &[String]) -> Result<std::process::Output> {
        debug!(args = ?args, dir = %work_dir.display(), "running docker compose");
        Command::new("docker")
            .arg("compose")
            .args(args)
            .current_dir(work_dir)
            .output()
            .await
            .map_err(|e| Error::Engine(format!("failed to spawn docker compose: {e}")))
    }

    async fn compose_combined(&self, work_dir: &Path, args: &[String]) -> Result<ComposeOutput> {
        let output = self.compose(work_dir, args).await?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ComposeOutput {
            output: combined,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

fn file_args(compose_file: &str, override_file: Option<&str>) -> Vec<String> {
    let mut args = vec!["-f".to_string(), compose_file.to_string()];
    if let Some(override_file) = override_file {
        args.push("-f".to_string());
        args.push(override_file.to_string());
    }
    args
}

fn project_args(project: &str, compose_file: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        project.to_string(),
        "-f".to_string(),
        compose_file.to_string(),
    ]
}

#[async_trait]
impl ContainerExecutor for DockerExecutor {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        // Drain the progress stream to completion; the pull is only done
        // when it closes.
        let mut stream = Box::pin(self.docker.create_image(Some(options), None, None));
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| Error::Image {
                image: image.to_string(),
                message: e.to_string(),
            })?;
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
        // Joining with ` && ` makes the first failing command abort the
        // rest and surface as the container exit code.
        let command = script.join(" && ");

        let config = ContainerConfig {
            image: Some(image.to_string()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command]),
            env: Some(env.to_vec()),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}",
                    workspace.display(),
                    WORKSPACE_MOUNT
                )]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| Error::Engine(format!("failed to create container: {e}")))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Engine(format!("failed to start container: {e}")))?;

        Ok(created.id)
    }

    async fn follow_logs(&self, container_id: &str) -> Result<LogStream> {
        let docker = self.docker.clone();
        let container_id = container_id.to_string();
        let (tx, rx) = mpsc::channel::<Result<LogChunk>>(64);

        // The daemon transport deframes the multiplexed stream into typed
        // chunks; payloads are still arbitrary slices of output, not lines.
        // A forwarding task owns the connection so the returned stream has
        // no ties to the executor.
        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };

            let mut stream = Box::pin(docker.logs(&container_id, Some(options)));
            while let Some(item) = stream.next().await {
                let chunk = match item {
                    Ok(LogOutput::StdErr { message }) => Ok(LogChunk {
                        kind: StreamKind::Stderr,
                        data: message.to_vec(),
                    }),
                    Ok(output) => Ok(LogChunk {
                        kind: StreamKind::Stdout,
                        data: output.into_bytes().to_vec(),
                    }),
                    Err(e) => Err(Error::Engine(format!("log stream error: {e}"))),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn wait_for_exit(&self, container_id: &str) -> Result<i64> {
        let mut stream = Box::pin(
            self.docker
                .wait_container(container_id, None::<WaitContainerOptions<String>>),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // A non-zero exit comes back as an error variant carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Error::Engine(format!("container wait failed: {e}"))),
            None => Err(Error::Engine("container wait stream closed".to_string())),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(Error::Engine(format!("failed to remove container: {e}"))),
        }
    }

    async fn registry_login(&self, user: &str, token: &str, server: &str) -> Result<()> {
        let mut command = Command::new("docker");
        command.args(["login", "-u", user, "--password-stdin"]);
        if !server.is_empty() {
            command.arg(server);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::Registry(format!("failed to spawn docker login: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(token.as_bytes())
                .await
                .map_err(|e| Error::Registry(format!("failed to send credentials: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Registry(format!("docker login failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Registry(format!(
                "docker login failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let (repo, tag) = match target.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => (target, "latest"),
        };
        self.docker
            .tag_image(source, Some(TagImageOptions { repo, tag }))
            .await
            .map_err(|e| Error::Engine(format!("failed to tag {source} as {target}: {e}")))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        match self
            .docker
            .remove_image(image, None::<RemoveImageOptions>, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(Error::Engine(format!("failed to remove image {image}: {e}"))),
        }
    }

    async fn list_project_containers(&self, project: &str) -> Result<Vec<ProjectContainer>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("com.docker.compose.project={project}")],
        );

        let options = ListContainersOptions::<String> {
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::Engine(format!("failed to list containers: {e}")))?;

        let mut containers = Vec::new();
        for summary in summaries {
            let (Some(id), Some(image_name), Some(image_id)) =
                (summary.id, summary.image, summary.image_id)
            else {
                warn!("skipping container summary with missing fields");
                continue;
            };
            containers.push(ProjectContainer {
                id,
                image_name,
                image_id,
            });
        }
        Ok(containers)
    }

    async fn compose_build(
        &self,
        work_dir: &Path,
        compose_file: &str,
        override_file: Option<&str>,
    ) -> Result<ComposeOutput> {
        let mut args = file_args(compose_file, override_file);
        args.push("build".to_string());
        self.compose_combined(work_dir, &args).await
    }

    async fn compose_push(
        &self,
        work_dir: &Path,
        compose_file: &str,
        override_file: Option<&str>,
    ) -> Result<ComposeOutput> {
        let mut args = file_args(compose_file, override_file);
        args.push("push".to_string());
        self.compose_combined(work_dir, &args).await
    }

    async fn compose_pull(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
    ) -> Result<ComposeOutput> {
        let mut args = project_args(project, compose_file);
        args.push("pull".to_string());
        self.compose_combined(work_dir, &args).await
    }

    async fn compose_up(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
        build: bool,
        force_recreate: bool,
    ) -> Result<ComposeOutput> {
        let mut args = project_args(project, compose_file);
        args.push("up".to_string());
        args.push("-d".to_string());
        if build {
            args.push("--build".to_string());
        }
        if force_recreate {
            args.push("--force-recreate".to_string());
        }
        self.compose_combined(work_dir, &args).await
    }

    async fn compose_services(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
    ) -> Result<Vec<String>> {
        let mut args = project_args(project, compose_file);
        args.push("config".to_string());
        args.push("--services".to_string());

        let output = self.compose(work_dir, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Deploy(format!(
                "compose config --services failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn compose_ps(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
    ) -> Result<Vec<ServiceState>> {
        let mut args = project_args(project, compose_file);
        args.push("ps".to_string());
        args.push("--all".to_string());
        args.push("--format".to_string());
        args.push("json".to_string());

        let output = self.compose(work_dir, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Deploy(format!(
                "compose ps failed: {}",
                stderr.trim()
            )));
        }

        parse_compose_ps(&String::from_utf8_lossy(&output.stdout))
    }
}
