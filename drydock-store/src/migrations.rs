//! Schema setup
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` statements run at connect
//! time. Parent deletion cascades through pipelines, jobs, deployments,
//! and logs, so removing a project removes its whole history.

use sqlx::PgPool;

pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            repo_url TEXT NOT NULL UNIQUE,
            access_token TEXT NOT NULL DEFAULT '',
            pipeline_filename VARCHAR(255) NOT NULL DEFAULT 'pipeline.yml',
            deployment_filename VARCHAR(255) NOT NULL DEFAULT 'docker-compose.yml',
            ssh_host VARCHAR(255) NOT NULL DEFAULT '',
            ssh_user VARCHAR(255) NOT NULL DEFAULT '',
            ssh_private_key TEXT NOT NULL DEFAULT '',
            registry_user VARCHAR(255) NOT NULL DEFAULT '',
            registry_token TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            status VARCHAR(50) NOT NULL,
            commit_hash VARCHAR(64) NOT NULL,
            branch VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            stage VARCHAR(255) NOT NULL,
            image VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            exit_code BIGINT,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployments (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            status VARCHAR(50) NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_logs (
            id BIGSERIAL PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployment_logs (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variables (
            project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            key VARCHAR(255) NOT NULL,
            value TEXT NOT NULL,
            is_secret BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (project_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_project_id ON pipelines(project_id, created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_pipeline_id ON jobs(pipeline_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_logs_job_id ON job_logs(job_id, id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deployment_logs_pipeline_id ON deployment_logs(pipeline_id, id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("database migrations completed");
    Ok(())
}
