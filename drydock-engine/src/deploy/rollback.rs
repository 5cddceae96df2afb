//! Pipeline-level rollback
//!
//! When a deployment fails, the driver looks up the last pipeline that
//! deployed successfully, re-materializes that commit into a fresh
//! workspace, and runs the deployment engine against it. The failed run's
//! workspace is never reused; it may hold exactly the artifacts that broke.

use std::sync::Arc;

use tracing::{error, info, warn};

use drydock_core::request::RunRequest;
use drydock_core::store::Store;

use crate::config::EngineConfig;
use crate::deploy::DeploymentEngine;
use crate::fetch::{Checkout, SourceFetcher};
use crate::sink::DeployLog;
use crate::workspace::Workspace;

/// Delimiter line separating the failed deploy's logs from the recovery
pub const ROLLBACK_DELIMITER: &str = "=== ROLLBACK STARTED ===";

/// What the recovery attempt achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The prior commit deployed cleanly
    RolledBack,
    /// No prior commit, or the rollback deploy itself failed
    Failed,
}

/// Re-deploys the last known-good commit after a deployment failure
pub struct RollbackDriver {
    fetcher: Arc<dyn SourceFetcher>,
    store: Option<Arc<dyn Store>>,
    config: EngineConfig,
}

impl RollbackDriver {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        store: Option<Arc<dyn Store>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Attempts recovery; never escalates an error, only reports the outcome
    pub async fn recover(
        &self,
        engine: &DeploymentEngine,
        request: &RunRequest,
        log: &DeployLog,
    ) -> RecoveryOutcome {
        let Some(store) = &self.store else {
            log.line("No store configured, cannot locate a previous deployment")
                .await;
            return RecoveryOutcome::Failed;
        };

        let prior = match store.last_successful_pipeline(request.project_id).await {
            Ok(Some(pipeline)) if !pipeline.commit_hash.is_empty() => pipeline,
            Ok(_) => {
                log.line("No previous successful pipeline to roll back to")
                    .await;
                return RecoveryOutcome::Failed;
            }
            Err(e) => {
                error!(error = %e, "failed to query last successful pipeline");
                log.line(format!("Rollback lookup failed: {e}")).await;
                return RecoveryOutcome::Failed;
            }
        };

        info!(
            commit = %prior.commit_hash,
            "rolling back to last successful commit"
        );

        let mut rollback_request = request.clone();
        rollback_request.commit_hash = prior.commit_hash.clone();
        rollback_request.branch = prior.branch.clone();

        let workspace = match Workspace::for_rollback(
            &self.config.workspace_root,
            &request.repo_name,
            rollback_request.commit_short(),
        ) {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(error = %e, "failed to create rollback workspace");
                log.line(format!("Rollback workspace creation failed: {e}"))
                    .await;
                return RecoveryOutcome::Failed;
            }
        };

        let checkout = Checkout {
            repo_url: rollback_request.repo_url.clone(),
            branch: rollback_request.branch.clone(),
            commit_hash: rollback_request.commit_hash.clone(),
            access_token: rollback_request.access_token.clone(),
        };
        if let Err(e) = self.fetcher.fetch(&checkout, workspace.path()).await {
            log.line(format!("Rollback fetch failed: {e}")).await;
            return RecoveryOutcome::Failed;
        }

        log.line(ROLLBACK_DELIMITER).await;
        log.line(format!(
            "Re-deploying commit {} from pipeline {}",
            prior.commit_hash, prior.id
        ))
        .await;

        match engine.deploy(&rollback_request, workspace.path(), log).await {
            Ok(()) => {
                log.line("Rollback deployment succeeded").await;
                RecoveryOutcome::RolledBack
            }
            Err(e) => {
                error!(error = %e, "rollback deployment failed");
                log.line(format!("Rollback deployment failed: {e}")).await;
                RecoveryOutcome::Failed
            }
        }
    }
}
