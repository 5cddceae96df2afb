//! Domain types
//!
//! Persistent entities shared between the execution engine (mutates) and
//! the store (persists). Project owns pipelines, a pipeline owns its jobs
//! and exactly one deployment, and log lines hang off jobs or pipelines.

pub mod deployment;
pub mod job;
pub mod log;
pub mod pipeline;
pub mod project;

pub use deployment::{Deployment, DeploymentStatus};
pub use job::{Job, JobStatus};
pub use log::LogLine;
pub use pipeline::{Pipeline, PipelineStatus};
pub use project::{Project, Variable};
