//! Drydock Core
//!
//! Core types and abstractions for the drydock CI/CD engine.
//!
//! This crate contains:
//! - Domain types: persistent entities (Project, Pipeline, Job, Deployment)
//! - Config parsers: the declarative pipeline document and the compose document
//! - The `Store` contract consumed by the execution engine
//! - The error kinds shared across the workspace

pub mod config;
pub mod domain;
pub mod error;
pub mod names;
pub mod request;
pub mod store;

pub use error::{Error, Result};
