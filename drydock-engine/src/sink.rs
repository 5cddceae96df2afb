//! Log sinks
//!
//! Durable log persistence for jobs and deployments. Job lines are
//! buffered and flushed in batches; deployment lines stream through
//! immediately so the UI follows a deploy live. Store errors are logged
//! and swallowed here: losing a log line must never fail a run, and a
//! `None` store turns persistence into plain tracing output.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{error, info};
use uuid::Uuid;

use drydock_core::store::Store;

/// Batched append interface for job and deployment logs
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Appends one job log line; may buffer
    async fn append_job_line(&self, job_id: Uuid, line: &str);

    /// Appends one deployment log line
    async fn append_deployment_line(&self, pipeline_id: Uuid, line: &str);

    /// Flushes any buffered lines for the job; called on stream close
    async fn flush_job(&self, job_id: Uuid);
}

/// Removes the bytes Postgres cannot store in text columns
fn sanitize(line: &str) -> String {
    line.replace('\0', "")
}

/// Sink writing through to the store, batching job lines
pub struct StoreSink {
    store: Option<Arc<dyn Store>>,
    batch_size: usize,
    buffers: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl StoreSink {
    pub fn new(store: Option<Arc<dyn Store>>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    async fn persist_batch(&self, job_id: Uuid, batch: Vec<String>) {
        let Some(store) = &self.store else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = store.append_job_logs(job_id, &batch).await {
            error!(job = %job_id, error = %e, "failed to store job logs");
        }
    }
}

#[async_trait]
impl LogSink for StoreSink {
    async fn append_job_line(&self, job_id: Uuid, line: &str) {
        let line = sanitize(line);
        if line.is_empty() {
            return;
        }

        info!(job = %job_id, "{line}");

        // The buffer is owned by the job's single log pump, so the lock is
        // only ever contested by flush on close.
        let ready = {
            let mut buffers = self.buffers.lock().unwrap();
            let buffer = buffers.entry(job_id).or_default();
            buffer.push(line);
            if buffer.len() >= self.batch_size {
                Some(std::mem::take(buffer))
            } else {
                None
            }
        };

        if let Some(batch) = ready {
            self.persist_batch(job_id, batch).await;
        }
    }

    async fn append_deployment_line(&self, pipeline_id: Uuid, line: &str) {
        let line = sanitize(line);
        if line.is_empty() {
            return;
        }

        info!(pipeline = %pipeline_id, "{line}");

        if let Some(store) = &self.store {
            if let Err(e) = store.append_deployment_log(pipeline_id, &line).await {
                error!(pipeline = %pipeline_id, error = %e, "failed to store deployment log");
            }
        }
    }

    async fn flush_job(&self, job_id: Uuid) {
        let remainder = {
            let mut buffers = self.buffers.lock().unwrap();
            buffers.remove(&job_id).unwrap_or_default()
        };
        self.persist_batch(job_id, remainder).await;
    }
}

/// Deployment log handle scoped to one pipeline
///
/// Thin wrapper so the deployment engine does not thread `(sink,
/// pipeline_id)` through every call.
#[derive(Clone)]
pub struct DeployLog {
    sink: Arc<dyn LogSink>,
    pipeline_id: Uuid,
}

impl DeployLog {
    pub fn new(sink: Arc<dyn LogSink>, pipeline_id: Uuid) -> Self {
        Self { sink, pipeline_id }
    }

    pub fn pipeline_id(&self) -> Uuid {
        self.pipeline_id
    }

    pub async fn line(&self, line: impl AsRef<str>) {
        self.sink
            .append_deployment_line(self.pipeline_id, line.as_ref())
            .await;
    }

    /// Appends a titled block: `=== TITLE ===` followed by the non-blank
    /// lines of `content`
    pub async fn block(&self, title: &str, content: &str) {
        self.line(format!("=== {title} ===")).await;
        for line in content.lines() {
            if !line.trim().is_empty() {
                self.line(line).await;
            }
        }
    }
}
