//! Store contract
//!
//! The persistence interface the engine consumes. Any backend works; the
//! workspace ships a Postgres implementation. The engine holds an
//! `Option<Arc<dyn Store>>` and degrades to a no-persistence run when it
//! is `None`, so every call site must tolerate absence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Deployment, DeploymentStatus, Job, JobStatus, Pipeline, PipelineStatus, Project, Variable,
};
use crate::error::Result;

/// CRUD and append-log operations used by the engine
///
/// Implementations must be safe for concurrent use; the engine may drive
/// several pipeline runs at once.
#[async_trait]
pub trait Store: Send + Sync {
    async fn project(&self, id: Uuid) -> Result<Option<Project>>;

    async fn project_by_repo_url(&self, repo_url: &str) -> Result<Option<Project>>;

    async fn create_pipeline(&self, project_id: Uuid, branch: &str, commit: &str)
        -> Result<Pipeline>;

    /// Also maintains `finished_at`: set when the status is terminal
    async fn update_pipeline_status(&self, id: Uuid, status: PipelineStatus) -> Result<()>;

    /// Newest pipeline of the project with status `success` and a commit hash
    async fn last_successful_pipeline(&self, project_id: Uuid) -> Result<Option<Pipeline>>;

    async fn create_job(
        &self,
        pipeline_id: Uuid,
        name: &str,
        stage: &str,
        image: &str,
    ) -> Result<Job>;

    async fn job_by_name(&self, pipeline_id: Uuid, name: &str) -> Result<Option<Job>>;

    /// Also maintains `started_at` / `finished_at` from the status
    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i64>,
    ) -> Result<()>;

    /// Appends a batch of job log lines, preserving slice order
    async fn append_job_logs(&self, job_id: Uuid, lines: &[String]) -> Result<()>;

    async fn create_pending_deployment(&self, pipeline_id: Uuid) -> Result<Deployment>;

    async fn deployment_by_pipeline(&self, pipeline_id: Uuid) -> Result<Option<Deployment>>;

    async fn update_deployment_status(&self, id: Uuid, status: DeploymentStatus) -> Result<()>;

    async fn append_deployment_log(&self, pipeline_id: Uuid, line: &str) -> Result<()>;

    async fn variables(&self, project_id: Uuid) -> Result<Vec<Variable>>;
}
