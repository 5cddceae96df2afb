//! Project repository

use sqlx::PgPool;
use uuid::Uuid;

use drydock_core::domain::Project;

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, name, repo_url, access_token, pipeline_filename, deployment_filename,
               ssh_host, ssh_user, ssh_private_key, registry_user, registry_token, created_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn find_by_repo_url(
    pool: &PgPool,
    repo_url: &str,
) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, name, repo_url, access_token, pipeline_filename, deployment_filename,
               ssh_host, ssh_user, ssh_private_key, registry_user, registry_token, created_at
        FROM projects
        WHERE repo_url = $1
        "#,
    )
    .bind(repo_url)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    repo_url: String,
    access_token: String,
    pipeline_filename: String,
    deployment_filename: String,
    ssh_host: String,
    ssh_user: String,
    ssh_private_key: String,
    registry_user: String,
    registry_token: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            repo_url: row.repo_url,
            access_token: row.access_token,
            pipeline_filename: row.pipeline_filename,
            deployment_filename: row.deployment_filename,
            ssh_host: row.ssh_host,
            ssh_user: row.ssh_user,
            ssh_private_key: row.ssh_private_key,
            registry_user: row.registry_user,
            registry_token: row.registry_token,
            created_at: row.created_at,
        }
    }
}
