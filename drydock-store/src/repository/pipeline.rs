//! Pipeline repository

use std::str::FromStr;

use sqlx::PgPool;
use uuid::Uuid;

use drydock_core::domain::{Pipeline, PipelineStatus};

pub async fn create(
    pool: &PgPool,
    project_id: Uuid,
    branch: &str,
    commit: &str,
) -> Result<Pipeline, sqlx::Error> {
    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        project_id,
        status: PipelineStatus::Pending,
        commit_hash: commit.to_string(),
        branch: branch.to_string(),
        created_at: chrono::Utc::now(),
        finished_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO pipelines (id, project_id, status, commit_hash, branch, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(pipeline.id)
    .bind(pipeline.project_id)
    .bind(pipeline.status.as_str())
    .bind(&pipeline.commit_hash)
    .bind(&pipeline.branch)
    .bind(pipeline.created_at)
    .execute(pool)
    .await?;

    Ok(pipeline)
}

pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: PipelineStatus,
) -> Result<(), sqlx::Error> {
    let finished_at = status.is_terminal().then(chrono::Utc::now);

    sqlx::query(
        r#"
        UPDATE pipelines
        SET status = $1, finished_at = COALESCE($2, finished_at)
        WHERE id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(finished_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn last_successful(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, project_id, status, commit_hash, branch, created_at, finished_at
        FROM pipelines
        WHERE project_id = $1 AND status = 'success' AND commit_hash <> ''
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    project_id: Uuid,
    status: String,
    commit_hash: String,
    branch: String,
    created_at: chrono::DateTime<chrono::Utc>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            project_id: row.project_id,
            status: PipelineStatus::from_str(&row.status).unwrap_or(PipelineStatus::Failed),
            commit_hash: row.commit_hash,
            branch: row.branch,
            created_at: row.created_at,
            finished_at: row.finished_at,
        }
    }
}
