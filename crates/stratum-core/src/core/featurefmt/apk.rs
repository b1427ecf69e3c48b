//! Alpine installed-database parsing (`lib/apk/db/installed`).

use std::collections::HashSet;

use anyhow::Result;
use stratum_domain::{Feature, FeatureVersion, Namespace};

use crate::core::layerfiles::LayerFiles;

use super::Lister;

const INSTALLED_DB: &str = "lib/apk/db/installed";

pub(super) struct ApkLister;

impl Lister for ApkLister {
    fn name(&self) -> &'static str {
        "apk"
    }

    fn list_features(&self, files: &LayerFiles) -> Result<Vec<FeatureVersion>> {
        let Some(data) = files.get(INSTALLED_DB) else {
            return Ok(Vec::new());
        };
        let contents = String::from_utf8_lossy(&data.contents);

        let mut seen = HashSet::new();
        let mut features = Vec::new();
        for record in contents.split("\n\n") {
            let mut name = None;
            let mut version = None;
            for line in record.lines() {
                if let Some(value) = line.strip_prefix("P:") {
                    name = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("V:") {
                    version = Some(value.trim().to_string());
                }
            }
            let (Some(name), Some(version)) = (name, version) else {
                continue;
            };
            if name.is_empty() || version.is_empty() {
                continue;
            }
            if seen.insert((name.clone(), version.clone())) {
                features.push(FeatureVersion::new(
                    Feature::new(Namespace::default(), name),
                    version,
                ));
            }
        }
        Ok(features)
    }
}
