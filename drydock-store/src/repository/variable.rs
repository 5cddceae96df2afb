//! Project variable repository

use sqlx::PgPool;
use uuid::Uuid;

use drydock_core::domain::Variable;

pub async fn list_by_project(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<Variable>, sqlx::Error> {
    let rows = sqlx::query_as::<_, VariableRow>(
        r#"
        SELECT project_id, key, value, is_secret
        FROM variables
        WHERE project_id = $1
        ORDER BY key
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

#[derive(sqlx::FromRow)]
struct VariableRow {
    project_id: Uuid,
    key: String,
    value: String,
    is_secret: bool,
}

impl From<VariableRow> for Variable {
    fn from(row: VariableRow) -> Self {
        Variable {
            project_id: row.project_id,
            key: row.key,
            value: row.value,
            is_secret: row.is_secret,
        }
    }
}
