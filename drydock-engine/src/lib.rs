//! Drydock Engine
//!
//! The pipeline orchestrator core. A `RunRequest` enters the
//! `PipelineRunner`, which clones the source at a pinned commit, compiles
//! the stage/job plan, executes each job in an isolated container with the
//! workspace mounted, streams logs to the store, and on success hands off
//! to the `DeploymentEngine` (compose up locally, or build-push-ssh
//! remotely) with automatic rollback to the last known-good commit.
//!
//! Architecture:
//! - `executor`: container engine abstraction (pull, run, logs, compose)
//! - `fetch`: source retrieval at a branch + pinned commit
//! - `shell`: remote execution over SSH for the remote deploy flow
//! - `sink`: batched, sanitized log persistence
//! - `workspace`: scoped scratch directories, released on every exit path
//! - `runner`: the pipeline state machine
//! - `deploy`: deployment flows, health gating, and rollback

pub mod config;
pub mod deploy;
pub mod executor;
pub mod fetch;
pub mod runner;
pub mod shell;
pub mod sink;
pub mod workspace;
