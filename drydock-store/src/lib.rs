//! Drydock Store
//!
//! Postgres implementation of the core `Store` contract over `sqlx`.
//! Schema setup is idempotent; `PgStore::connect` creates the pool and
//! applies migrations, so a fresh database is ready after one call.

mod migrations;
mod repository;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use drydock_core::domain::{
    Deployment, DeploymentStatus, Job, JobStatus, Pipeline, PipelineStatus, Project, Variable,
};
use drydock_core::store::Store;
use drydock_core::{Error, Result};

/// Store backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects, applies migrations, and returns a ready store
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(store_err)?;

        migrations::run(&pool).await.map_err(store_err)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool; migrations are the caller's responsibility
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl Store for PgStore {
    async fn project(&self, id: Uuid) -> Result<Option<Project>> {
        repository::project::find_by_id(&self.pool, id)
            .await
            .map_err(store_err)
    }

    async fn project_by_repo_url(&self, repo_url: &str) -> Result<Option<Project>> {
        repository::project::find_by_repo_url(&self.pool, repo_url)
            .await
            .map_err(store_err)
    }

    async fn create_pipeline(
        &self,
        project_id: Uuid,
        branch: &str,
        commit: &str,
    ) -> Result<Pipeline> {
        repository::pipeline::create(&self.pool, project_id, branch, commit)
            .await
            .map_err(store_err)
    }

    async fn update_pipeline_status(&self, id: Uuid, status: PipelineStatus) -> Result<()> {
        repository::pipeline::update_status(&self.pool, id, status)
            .await
            .map_err(store_err)
    }

    async fn last_successful_pipeline(&self, project_id: Uuid) -> Result<Option<Pipeline>> {
        repository::pipeline::last_successful(&self.pool, project_id)
            .await
            .map_err(store_err)
    }

    async fn create_job(
        &self,
        pipeline_id: Uuid,
        name: &str,
        stage: &str,
        image: &str,
    ) -> Result<Job> {
        repository::job::create(&self.pool, pipeline_id, name, stage, image)
            .await
            .map_err(store_err)
    }

    async fn job_by_name(&self, pipeline_id: Uuid, name: &str) -> Result<Option<Job>> {
        repository::job::find_by_name(&self.pool, pipeline_id, name)
            .await
            .map_err(store_err)
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i64>,
    ) -> Result<()> {
        repository::job::update_status(&self.pool, id, status, exit_code)
            .await
            .map_err(store_err)
    }

    async fn append_job_logs(&self, job_id: Uuid, lines: &[String]) -> Result<()> {
        repository::job::append_logs(&self.pool, job_id, lines)
            .await
            .map_err(store_err)
    }

    async fn create_pending_deployment(&self, pipeline_id: Uuid) -> Result<Deployment> {
        repository::deployment::create_pending(&self.pool, pipeline_id)
            .await
            .map_err(store_err)
    }

    async fn deployment_by_pipeline(&self, pipeline_id: Uuid) -> Result<Option<Deployment>> {
        repository::deployment::find_by_pipeline(&self.pool, pipeline_id)
            .await
            .map_err(store_err)
    }

    async fn update_deployment_status(&self, id: Uuid, status: DeploymentStatus) -> Result<()> {
        repository::deployment::update_status(&self.pool, id, status)
            .await
            .map_err(store_err)
    }

    async fn append_deployment_log(&self, pipeline_id: Uuid, line: &str) -> Result<()> {
        repository::deployment::append_log(&self.pool, pipeline_id, line)
            .await
            .map_err(store_err)
    }

    async fn variables(&self, project_id: Uuid) -> Result<Vec<Variable>> {
        repository::variable::list_by_project(&self.pool, project_id)
            .await
            .map_err(store_err)
    }
}
