//! Job repository, including job log batches

use std::str::FromStr;

use sqlx::PgPool;
use uuid::Uuid;

use drydock_core::domain::{Job, JobStatus};

pub async fn create(
    pool: &PgPool,
    pipeline_id: Uuid,
    name: &str,
    stage: &str,
    image: &str,
) -> Result<Job, sqlx::Error> {
    let job = Job {
        id: Uuid::new_v4(),
        pipeline_id,
        name: name.to_string(),
        stage: stage.to_string(),
        image: image.to_string(),
        status: JobStatus::Pending,
        exit_code: None,
        started_at: None,
        finished_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO jobs (id, pipeline_id, name, stage, image, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(job.id)
    .bind(job.pipeline_id)
    .bind(&job.name)
    .bind(&job.stage)
    .bind(&job.image)
    .bind(job.status.as_str())
    .execute(pool)
    .await?;

    Ok(job)
}

pub async fn find_by_name(
    pool: &PgPool,
    pipeline_id: Uuid,
    name: &str,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, pipeline_id, name, stage, image, status, exit_code, started_at, finished_at
        FROM jobs
        WHERE pipeline_id = $1 AND name = $2
        "#,
    )
    .bind(pipeline_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: JobStatus,
    exit_code: Option<i64>,
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now();
    let started_at = (status == JobStatus::Running).then_some(now);
    let finished_at = status.is_terminal().then_some(now);

    sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1,
            exit_code = COALESCE($2, exit_code),
            started_at = COALESCE($3, started_at),
            finished_at = COALESCE($4, finished_at)
        WHERE id = $5
        "#,
    )
    .bind(status.as_str())
    .bind(exit_code)
    .bind(started_at)
    .bind(finished_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Inserts a batch of log lines inside one transaction, preserving order
pub async fn append_logs(
    pool: &PgPool,
    job_id: Uuid,
    lines: &[String],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now();

    for line in lines {
        sqlx::query("INSERT INTO job_logs (job_id, content, created_at) VALUES ($1, $2, $3)")
            .bind(job_id)
            .bind(line)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    stage: String,
    image: String,
    status: String,
    exit_code: Option<i64>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            stage: row.stage,
            image: row.image,
            status: JobStatus::from_str(&row.status).unwrap_or(JobStatus::Failed),
            exit_code: row.exit_code,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}
