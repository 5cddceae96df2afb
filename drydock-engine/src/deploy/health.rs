//! Deployment health gating
//!
//! After `compose up`, the local flow refuses to call a deployment done
//! until every expected service reports running and healthy. Services
//! without a healthcheck pass on `running` alone; a service that turns
//! unhealthy or exits fails the gate immediately instead of burning the
//! rest of the deadline.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use drydock_core::{Error, Result};

use crate::executor::ContainerExecutor;
use crate::sink::DeployLog;

pub struct HealthGate {
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl HealthGate {
    /// Polls the stack until every expected service is ready, a service
    /// definitively fails, or the deadline passes
    pub async fn wait(
        &self,
        executor: &dyn ContainerExecutor,
        work_dir: &Path,
        compose_file: &str,
        project: &str,
        log: &DeployLog,
    ) -> Result<()> {
        let expected = executor
            .compose_services(work_dir, compose_file, project)
            .await?;
        if expected.is_empty() {
            return Ok(());
        }

        info!(project, services = expected.len(), "waiting for services to become healthy");
        let started = tokio::time::Instant::now();

        loop {
            let states = executor.compose_ps(work_dir, compose_file, project).await?;
            let by_service: HashMap<&str, _> = states
                .iter()
                .map(|s| (s.service.as_str(), s))
                .collect();

            let mut all_ready = true;
            for service in &expected {
                match by_service.get(service.as_str()) {
                    Some(state) if state.is_failed() => {
                        log.line(format!(
                            "Service {service} is {} (health: {})",
                            state.state,
                            if state.health.is_empty() { "none" } else { &state.health }
                        ))
                        .await;
                        return Err(Error::ServiceUnhealthy {
                            service: service.clone(),
                            state: state.state.clone(),
                        });
                    }
                    Some(state) if state.is_ready() => {}
                    Some(state) => {
                        // created / restarting / starting: keep polling.
                        debug!(service = %service, state = %state.state, health = %state.health, "not ready yet");
                        all_ready = false;
                    }
                    None => {
                        // Container not created yet.
                        debug!(service = %service, "not listed yet");
                        all_ready = false;
                    }
                }
            }

            if all_ready {
                log.line("All services healthy").await;
                return Ok(());
            }

            if started.elapsed() + self.poll_interval > self.deadline {
                return Err(Error::HealthTimeout(self.deadline));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
