//! Declarative config documents
//!
//! - `pipeline`: the CI document (`stages` + jobs) checked into the repo
//! - `compose`: the deployment document queries and the override generator

pub mod compose;
pub mod pipeline;
