//! Container execution layer
//!
//! `ContainerExecutor` abstracts everything the engine asks of the
//! container runtime: image pulls, job containers with a mounted
//! workspace, multiplexed log streams, registry auth, and the compose CLI.
//! The real implementation talks to the Docker daemon; tests swap in a
//! scripted fake.

pub mod docker;
pub mod stream;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use drydock_core::Result;

pub use docker::DockerExecutor;
pub use stream::{encode_frame, FrameDecoder, LineAssembler, LogChunk, StreamKind};

/// Demultiplexed log chunks as they arrive from the engine
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogChunk>> + Send>>;

/// Output of one compose CLI invocation
///
/// Compose failures are data, not errors: callers stream the combined
/// output into the deployment log either way and then branch on `success`.
#[derive(Debug, Clone)]
pub struct ComposeOutput {
    /// Combined stdout and stderr
    pub output: String,
    pub exit_code: i32,
}

impl ComposeOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A container observed in a compose project, captured for the
/// pre-deploy snapshot
#[derive(Debug, Clone)]
pub struct ProjectContainer {
    pub id: String,
    /// Image reference as written in the compose file, e.g. `acme/web:latest`
    pub image_name: String,
    /// Resolved image digest id, e.g. `sha256:...`
    pub image_id: String,
}

/// Everything the engine asks of the container runtime
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    /// Pulls an image, reading the progress stream to completion
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Creates and starts a job container, returning its id
    ///
    /// The workspace is bind-mounted at `/workspace`, which is also the
    /// working directory. The script lines are joined with ` && ` and run
    /// under `sh -c`, so the first non-zero command aborts the rest and
    /// becomes the container exit code.
    async fn run_job(
        &self,
        image: &str,
        script: &[String],
        workspace: &Path,
        env: &[String],
    ) -> Result<String>;

    /// Follows the container's multiplexed log stream until it closes
    async fn follow_logs(&self, container_id: &str) -> Result<LogStream>;

    /// Blocks until the container is no longer running; returns its exit code
    async fn wait_for_exit(&self, container_id: &str) -> Result<i64>;

    /// Force-removes a container; removing an already-gone container is not
    /// an error
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Establishes registry credentials for both API pushes and any
    /// compose subprocess spawned afterwards
    async fn registry_login(&self, user: &str, token: &str, server: &str) -> Result<()>;

    /// Applies `target` as an additional tag on `source` (ref or image id)
    async fn tag_image(&self, source: &str, target: &str) -> Result<()>;

    /// Removes an image tag; a missing tag is not an error
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Containers currently running under the given compose project
    async fn list_project_containers(&self, project: &str) -> Result<Vec<ProjectContainer>>;

    async fn compose_build(
        &self,
        work_dir: &Path,
        compose_file: &str,
        override_file: Option<&str>,
    ) -> Result<ComposeOutput>;

    async fn compose_push(
        &self,
        work_dir: &Path,
        compose_file: &str,
        override_file: Option<&str>,
    ) -> Result<ComposeOutput>;

    async fn compose_pull(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
    ) -> Result<ComposeOutput>;

    async fn compose_up(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
        build: bool,
        force_recreate: bool,
    ) -> Result<ComposeOutput>;

    /// Service names compose resolves for the project
    /// (`compose config --services`)
    async fn compose_services(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
    ) -> Result<Vec<String>>;

    /// Current service states (`compose ps --all --format json`)
    async fn compose_ps(
        &self,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
    ) -> Result<Vec<ServiceState>>;
}

/// One row of `compose ps` output
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceState {
    #[serde(rename = "Service")]
    pub service: String,
    /// `running`, `exited`, `created`, `restarting`, `dead`, ...
    #[serde(rename = "State")]
    pub state: String,
    /// `healthy`, `unhealthy`, `starting`, or empty when no healthcheck
    #[serde(rename = "Health", default)]
    pub health: String,
}

impl ServiceState {
    /// Passes the deploy gate: running, and either healthy or without a
    /// healthcheck
    pub fn is_ready(&self) -> bool {
        self.state == "running" && (self.health == "healthy" || self.health.is_empty())
    }

    /// Definitively failed; waiting longer cannot help
    pub fn is_failed(&self) -> bool {
        self.health == "unhealthy" || matches!(self.state.as_str(), "exited" | "dead")
    }
}

/// Parses `compose ps --format json` output
///
/// Newer compose emits one JSON object per line; older releases emit a
/// single array. Both are accepted.
pub fn parse_compose_ps(output: &str) -> Result<Vec<ServiceState>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| drydock_core::Error::Engine(format!("compose ps output: {e}")));
    }

    let mut states = Vec::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let state: ServiceState = serde_json::from_str(line)
            .map_err(|e| drydock_core::Error::Engine(format!("compose ps line: {e}")))?;
        states.push(state);
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compose_ps_ndjson() {
        let output = r#"
{"Service":"web","State":"running","Health":"healthy"}
{"Service":"db","State":"running","Health":""}
"#;
        let states = parse_compose_ps(output).unwrap();
        assert_eq!(states.len(), 2);
        assert!(states[0].is_ready());
        assert!(states[1].is_ready());
    }

    #[test]
    fn test_parse_compose_ps_array() {
        let output = r#"[{"Service":"web","State":"exited","Health":""}]"#;
        let states = parse_compose_ps(output).unwrap();
        assert_eq!(states.len(), 1);
        assert!(states[0].is_failed());
    }

    #[test]
    fn test_parse_compose_ps_empty() {
        assert!(parse_compose_ps("").unwrap().is_empty());
        assert!(parse_compose_ps("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_service_state_gates() {
        let starting = ServiceState {
            service: "web".to_string(),
            state: "running".to_string(),
            health: "starting".to_string(),
        };
        assert!(!starting.is_ready());
        assert!(!starting.is_failed());

        let unhealthy = ServiceState {
            service: "web".to_string(),
            state: "running".to_string(),
            health: "unhealthy".to_string(),
        };
        assert!(unhealthy.is_failed());

        let restarting = ServiceState {
            service: "web".to_string(),
            state: "restarting".to_string(),
            health: String::new(),
        };
        assert!(!restarting.is_ready());
        assert!(!restarting.is_failed());
    }

    #[test]
    fn test_missing_health_field_defaults_empty() {
        let states = parse_compose_ps(r#"{"Service":"db","State":"running"}"#).unwrap();
        assert!(states[0].is_ready());
    }
}
