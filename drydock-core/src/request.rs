//! Run requests
//!
//! The single entrypoint into the engine. The external trigger layer
//! (webhook handler or manual API) resolves the project, creates the
//! pipeline record, and hands the engine a self-contained `RunRequest`
//! snapshot so the run never re-reads mutable project state mid-flight.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Pipeline, Project};
use crate::error::{Error, Result};

/// Everything one pipeline run needs, captured at trigger time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub repo_url: String,
    pub repo_name: String,
    pub branch: String,
    pub commit_hash: String,
    pub access_token: String,
    pub pipeline_filename: String,
    pub deployment_filename: String,
    pub ssh_host: String,
    pub ssh_user: String,
    pub ssh_private_key: String,
    pub registry_user: String,
    pub registry_token: String,
    pub project_id: Uuid,
    pub pipeline_id: Uuid,
}

impl RunRequest {
    /// Builds a request from a project record and its pipeline row
    pub fn from_project(project: &Project, pipeline: &Pipeline) -> Self {
        Self {
            repo_url: project.repo_url.clone(),
            repo_name: project.name.clone(),
            branch: pipeline.branch.clone(),
            commit_hash: pipeline.commit_hash.clone(),
            access_token: project.access_token.clone(),
            pipeline_filename: project.pipeline_filename().to_string(),
            deployment_filename: project.deployment_filename().to_string(),
            ssh_host: project.ssh_host.clone(),
            ssh_user: project.ssh_user.clone(),
            ssh_private_key: project.ssh_private_key.clone(),
            registry_user: project.registry_user.clone(),
            registry_token: project.registry_token.clone(),
            project_id: project.id,
            pipeline_id: pipeline.id,
        }
    }

    /// Remote deployment needs both a registry and an SSH target;
    /// otherwise the engine deploys against the local runtime
    pub fn uses_remote_deploy(&self) -> bool {
        !self.registry_user.is_empty() && !self.ssh_host.is_empty()
    }

    /// First eight characters of the commit hash, for workspace and tag names
    pub fn commit_short(&self) -> &str {
        let end = self.commit_hash.len().min(8);
        &self.commit_hash[..end]
    }
}

/// Push webhook payload, as delivered by the forge
///
/// Only the fields the trigger layer needs survive deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    /// Full ref, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit SHA after the push
    pub after: String,
    /// True when the push deleted the branch; such events must be ignored
    #[serde(default)]
    pub deleted: bool,
    pub repository: PushRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub name: String,
    pub clone_url: String,
}

impl PushEvent {
    /// Branch name with the `refs/heads/` prefix stripped
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// Converts the event into a run request against `project`
    ///
    /// `pipeline` must already exist; branch-deletion pushes are rejected
    /// here rather than silently producing a doomed clone.
    pub fn into_run_request(self, project: &Project, pipeline: &Pipeline) -> Result<RunRequest> {
        if self.deleted {
            return Err(Error::Fetch("push event deleted the branch".to_string()));
        }
        let mut request = RunRequest::from_project(project, pipeline);
        request.repo_url = self.repository.clone_url.clone();
        request.repo_name = self.repository.name.clone();
        request.branch = self.branch().to_string();
        request.commit_hash = self.after.clone();
        Ok(request)
    }
}
