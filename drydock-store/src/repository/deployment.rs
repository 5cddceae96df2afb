//! Deployment repository, including deployment logs

use std::str::FromStr;

use sqlx::PgPool;
use uuid::Uuid;

use drydock_core::domain::{Deployment, DeploymentStatus};

pub async fn create_pending(
    pool: &PgPool,
    pipeline_id: Uuid,
) -> Result<Deployment, sqlx::Error> {
    let deployment = Deployment {
        id: Uuid::new_v4(),
        pipeline_id,
        status: DeploymentStatus::Pending,
        started_at: None,
        finished_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO deployments (id, pipeline_id, status)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(deployment.id)
    .bind(deployment.pipeline_id)
    .bind(deployment.status.as_str())
    .execute(pool)
    .await?;

    Ok(deployment)
}

pub async fn find_by_pipeline(
    pool: &PgPool,
    pipeline_id: Uuid,
) -> Result<Option<Deployment>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeploymentRow>(
        r#"
        SELECT id, pipeline_id, status, started_at, finished_at
        FROM deployments
        WHERE pipeline_id = $1
        "#,
    )
    .bind(pipeline_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: DeploymentStatus,
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now();
    let started_at = (status == DeploymentStatus::Deploying).then_some(now);
    let finished_at = status.is_terminal().then_some(now);

    sqlx::query(
        r#"
        UPDATE deployments
        SET status = $1,
            started_at = COALESCE($2, started_at),
            finished_at = COALESCE($3, finished_at)
        WHERE id = $4
        "#,
    )
    .bind(status.as_str())
    .bind(started_at)
    .bind(finished_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn append_log(
    pool: &PgPool,
    pipeline_id: Uuid,
    line: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO deployment_logs (pipeline_id, content, created_at) VALUES ($1, $2, $3)",
    )
    .bind(pipeline_id)
    .bind(line)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    pipeline_id: Uuid,
    status: String,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<DeploymentRow> for Deployment {
    fn from(row: DeploymentRow) -> Self {
        Deployment {
            id: row.id,
            pipeline_id: row.pipeline_id,
            status: DeploymentStatus::from_str(&row.status).unwrap_or(DeploymentStatus::Failed),
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}
