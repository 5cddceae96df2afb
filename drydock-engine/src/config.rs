//! Engine configuration
//!
//! Tunables for the runner and deployment engine. Defaults match the
//! behavior a single-host install expects; everything can be overridden
//! from the environment for container deployments.

use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root under which per-run workspaces are created
    /// (`<root>/cicd-workspaces/<repo>-<commit>-<ts>`)
    pub workspace_root: PathBuf,

    /// Job log lines buffered before a batch is flushed to the store
    pub log_batch_size: usize,

    /// Interval between deployment health probes
    pub health_poll_interval: Duration,

    /// Hard deadline for the deployment health check
    pub health_deadline: Duration,
}

impl EngineConfig {
    /// Creates configuration from environment variables
    ///
    /// - `DRYDOCK_WORKSPACE_ROOT` (optional, default: system temp dir)
    /// - `DRYDOCK_LOG_BATCH_SIZE` (optional, default: 10)
    /// - `DRYDOCK_HEALTH_POLL_SECS` (optional, default: 10)
    /// - `DRYDOCK_HEALTH_DEADLINE_SECS` (optional, default: 120)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("DRYDOCK_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(size) = read_env_number("DRYDOCK_LOG_BATCH_SIZE") {
            config.log_batch_size = size as usize;
        }
        if let Some(secs) = read_env_number("DRYDOCK_HEALTH_POLL_SECS") {
            config.health_poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env_number("DRYDOCK_HEALTH_DEADLINE_SECS") {
            config.health_deadline = Duration::from_secs(secs);
        }

        config
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_batch_size == 0 {
            anyhow::bail!("log_batch_size must be greater than 0");
        }
        if self.health_poll_interval.is_zero() {
            anyhow::bail!("health_poll_interval must be greater than 0");
        }
        if self.health_deadline < self.health_poll_interval {
            anyhow::bail!("health_deadline must be at least one poll interval");
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            log_batch_size: 10,
            health_poll_interval: Duration::from_secs(10),
            health_deadline: Duration::from_secs(120),
        }
    }
}

fn read_env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
