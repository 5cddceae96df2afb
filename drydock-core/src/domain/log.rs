//! Log line domain type

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted log line, owned by either a job or a pipeline deployment
///
/// Append-only. Content never contains a NUL byte; the sink strips them
/// before persisting (Postgres rejects NUL in text columns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub id: i64,
    pub job_id: Option<Uuid>,
    pub pipeline_id: Option<Uuid>,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
