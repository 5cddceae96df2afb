//! Project domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default pipeline document name when a project leaves it blank
pub const DEFAULT_PIPELINE_FILENAME: &str = "pipeline.yml";

/// Default compose document name when a project leaves it blank
pub const DEFAULT_DEPLOYMENT_FILENAME: &str = "docker-compose.yml";

/// A registered repository with its deployment credentials
///
/// Created by the external API layer; the engine only reads it. Secret
/// fields arrive already decrypted, secret storage is the store's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Unique per project; webhooks are matched against it
    pub repo_url: String,
    pub access_token: String,
    pub pipeline_filename: String,
    pub deployment_filename: String,
    pub ssh_host: String,
    pub ssh_user: String,
    pub ssh_private_key: String,
    pub registry_user: String,
    pub registry_token: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Project {
    /// Pipeline filename with the default applied
    pub fn pipeline_filename(&self) -> &str {
        if self.pipeline_filename.is_empty() {
            DEFAULT_PIPELINE_FILENAME
        } else {
            &self.pipeline_filename
        }
    }

    /// Deployment filename with the default applied
    pub fn deployment_filename(&self) -> &str {
        if self.deployment_filename.is_empty() {
            DEFAULT_DEPLOYMENT_FILENAME
        } else {
            &self.deployment_filename
        }
    }
}

/// A per-project environment variable injected into job containers
///
/// `is_secret` only controls masking on API reads; the engine always sees
/// the plain value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub project_id: Uuid,
    pub key: String,
    pub value: String,
    pub is_secret: bool,
}
