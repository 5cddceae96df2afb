//! Pipeline document parser
//!
//! The pipeline file is a YAML mapping with one reserved key, `stages`
//! (the canonical execution order), and every other top-level key naming a
//! job. Declaration order of jobs is preserved so execution is stable
//! within a stage.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One job definition as written in the pipeline file
///
/// Fields default to empty rather than failing the parse; validation
/// happens at plan time so the error can name the offending job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub script: Vec<String>,
}

/// Parsed pipeline document: ordered stages plus jobs in declaration order
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub stages: Vec<String>,
    pub jobs: Vec<(String, JobSpec)>,
}

/// A job placed into the execution plan
///
/// The plan is totally ordered by `(stage_index, declaration order)`; the
/// runner walks it front to back and stops at the first failure.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub name: String,
    pub stage: String,
    pub stage_index: usize,
    pub image: String,
    pub script: Vec<String>,
}

impl PipelineFile {
    /// Parses pipeline YAML from a string
    pub fn parse(input: &str) -> Result<Self> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(input).map_err(|e| Error::pipeline_parse(e.to_string()))?;

        let mapping = doc
            .as_mapping()
            .ok_or_else(|| Error::pipeline_parse("document is not a YAML mapping"))?;

        let mut stages: Vec<String> = Vec::new();
        let mut jobs: Vec<(String, JobSpec)> = Vec::new();

        for (key, value) in mapping {
            let key = key
                .as_str()
                .ok_or_else(|| Error::pipeline_parse("top-level keys must be strings"))?;

            if key == "stages" {
                stages = serde_yaml::from_value(value.clone())
                    .map_err(|e| Error::pipeline_parse(format!("stages: {e}")))?;
            } else {
                let spec: JobSpec = serde_yaml::from_value(value.clone())
                    .map_err(|e| Error::pipeline_parse(format!("job '{key}': {e}")))?;
                jobs.push((key.to_string(), spec));
            }
        }

        Ok(Self { stages, jobs })
    }

    /// Reads and parses the pipeline file at `path`
    ///
    /// A missing file is reported as `ConfigNotFound` so the runner can
    /// distinguish it from a malformed document.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Builds the execution plan
    ///
    /// Jobs are ordered by the position of their stage in `stages`, then by
    /// declaration order. A job whose stage is not declared fails the plan
    /// outright; a silently skipped job hides typos until deploy time.
    pub fn plan(&self) -> Result<Vec<PlannedJob>> {
        let mut planned = Vec::with_capacity(self.jobs.len());

        for (name, spec) in &self.jobs {
            let stage_index = self
                .stages
                .iter()
                .position(|s| s == &spec.stage)
                .ok_or_else(|| Error::UnknownStage {
                    job: name.clone(),
                    stage: spec.stage.clone(),
                })?;

            planned.push(PlannedJob {
                name: name.clone(),
                stage: spec.stage.clone(),
                stage_index,
                image: spec.image.clone(),
                script: spec.script.clone(),
            });
        }

        // Stable sort keeps declaration order within a stage.
        planned.sort_by_key(|job| job.stage_index);
        Ok(planned)
    }
}
