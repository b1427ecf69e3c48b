//! Repository→CPE mapping used to scope certified advisories.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const MAPPING_FILENAME: &str = "repository-to-cpe.json";

#[derive(Debug, Default, Deserialize)]
pub struct RepoCpeMapping {
    #[serde(default)]
    data: HashMap<String, RepoCpes>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoCpes {
    #[serde(default)]
    cpes: Vec<String>,
}

impl RepoCpeMapping {
    /// Loads `repository-to-cpe.json` from the configured directory.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(MAPPING_FILENAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read(path)
            .with_context(|| format!("reading repo→CPE mapping {}", path.display()))?;
        serde_json::from_slice(&contents)
            .with_context(|| format!("parsing repo→CPE mapping {}", path.display()))
    }

    /// CPEs of every mapped repository, sorted and deduplicated. Unmapped
    /// repositories are silently skipped.
    pub fn cpes_for(&self, repositories: &[String]) -> Vec<String> {
        let mut cpes: Vec<String> = repositories
            .iter()
            .filter_map(|repo| self.data.get(repo))
            .flat_map(|entry| entry.cpes.iter().cloned())
            .collect();
        cpes.sort();
        cpes.dedup();
        cpes
    }
}
