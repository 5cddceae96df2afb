//! Error kinds shared across the drydock workspace

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the engine and its collaborators
///
/// Each variant maps onto a user-visible outcome: config and fetch errors
/// fail the pipeline, image and exec errors fail the current job and abort
/// the run, and the deployment variants fail the deployment and trigger the
/// rollback path. None of them abort the orchestrator process itself.
#[derive(Debug, Error)]
pub enum Error {
    /// Expected pipeline or compose file is absent from the workspace
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Malformed YAML in a pipeline or compose document
    #[error("failed to parse {kind}: {message}")]
    Parse {
        /// Which document failed ("pipeline config", "compose config", ...)
        kind: &'static str,
        /// Underlying parser message
        message: String,
    },

    /// A job references a stage that is not declared in `stages`
    #[error("job '{job}' references unknown stage '{stage}'")]
    UnknownStage { job: String, stage: String },

    /// Source retrieval failed
    #[error("source fetch failed: {0}")]
    Fetch(String),

    /// Image pull failed
    #[error("failed to pull image '{image}': {message}")]
    Image { image: String, message: String },

    /// A job container exited with a non-zero code
    #[error("container exited with code {code}")]
    Exec { code: i64 },

    /// Registry login or push failed
    #[error("registry operation failed: {0}")]
    Registry(String),

    /// SSH session or remote command failed
    #[error("remote execution failed: {0}")]
    Remote(String),

    /// A compose invocation failed during deployment
    #[error("deployment failed: {0}")]
    Deploy(String),

    /// Deployment health check did not converge before the deadline
    #[error("deployment health check timed out after {0:?}")]
    HealthTimeout(Duration),

    /// A deployed service reported an unhealthy or dead state
    #[error("service '{service}' is unhealthy (state: {state})")]
    ServiceUnhealthy { service: String, state: String },

    /// The rollback itself failed; the deployment stays failed
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Persistence backend error
    #[error("store error: {0}")]
    Store(String),

    /// Container engine error outside the pull/exec paths
    #[error("container engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Parse error for the pipeline document
    pub fn pipeline_parse(message: impl Into<String>) -> Self {
        Self::Parse {
            kind: "pipeline config",
            message: message.into(),
        }
    }

    /// Parse error for the compose document
    pub fn compose_parse(message: impl Into<String>) -> Self {
        Self::Parse {
            kind: "compose config",
            message: message.into(),
        }
    }
}
