//! Compose document queries and the override generator
//!
//! The engine reads two things out of a compose file: which services carry
//! a `build:` context (only those get their image rewritten for registry
//! deploys) and which declare a hardcoded `container_name`. Everything
//! else is opaque and left to the compose CLI.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::names::clean_image_component;

/// Name of the generated override file, written next to the compose file
pub const OVERRIDE_FILENAME: &str = "docker-compose.override.yml";

#[derive(Debug, Default, Deserialize)]
struct RawCompose {
    #[serde(default)]
    services: HashMap<String, serde_yaml::Value>,
}

/// A parsed compose document, limited to the queries the engine needs
#[derive(Debug)]
pub struct ComposeFile {
    raw: RawCompose,
}

impl ComposeFile {
    /// Parses compose YAML from a string
    pub fn parse(input: &str) -> Result<Self> {
        let raw: RawCompose =
            serde_yaml::from_str(input).map_err(|e| Error::compose_parse(e.to_string()))?;
        Ok(Self { raw })
    }

    /// Reads and parses the compose file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Services declaring a `build:` key, sorted for stable output
    pub fn buildable_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .raw
            .services
            .iter()
            .filter(|(_, body)| body.get("build").is_some())
            .map(|(name, _)| name.clone())
            .collect();
        services.sort();
        services
    }

    /// All hardcoded `container_name` values, sorted
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .raw
            .services
            .values()
            .filter_map(|body| {
                body.get("container_name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OverrideDoc {
    services: BTreeMap<String, ServiceOverride>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceOverride {
    image: String,
}

/// Generates the override fragment pinning buildable services to
/// commit-tagged images
///
/// Each service maps to `<registry_user>/<project>-<service>:<tag>` with
/// project and service lowercased and spaces dashed. The BTreeMap keeps
/// the emitted order deterministic.
pub fn generate_override(
    services: &[String],
    registry_user: &str,
    project_name: &str,
    tag: &str,
) -> Result<Vec<u8>> {
    let clean_project = clean_image_component(project_name);

    let mut entries = BTreeMap::new();
    for service in services {
        let clean_service = clean_image_component(service);
        let image = format!("{registry_user}/{clean_project}-{clean_service}:{tag}");
        entries.insert(service.clone(), ServiceOverride { image });
    }

    let doc = OverrideDoc { services: entries };
    let yaml = serde_yaml::to_string(&doc).map_err(|e| Error::compose_parse(e.to_string()))?;
    Ok(yaml.into_bytes())
}
