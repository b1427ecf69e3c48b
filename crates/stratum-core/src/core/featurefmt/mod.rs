//! Installed-package enumeration from package-manager state files.
//!
//! Each lister knows one package database format. All listers run against
//! every layer; a lister whose files are absent contributes nothing. The
//! features come back with empty namespaces — the ingestion worker fills
//! them through the parent/layer fallback chain before persistence.

use anyhow::Result;
use stratum_domain::FeatureVersion;

use crate::core::layerfiles::LayerFiles;

pub mod apk;
pub mod dpkg;
pub mod rpm;

pub(crate) trait Lister: Send + Sync {
    fn name(&self) -> &'static str;

    fn list_features(&self, files: &LayerFiles) -> Result<Vec<FeatureVersion>>;
}

static LISTERS: &[&dyn Lister] = &[&dpkg::DpkgLister, &rpm::RpmLister, &apk::ApkLister];

/// Runs every registered lister and concatenates the results.
pub fn list_features(files: &LayerFiles) -> Result<Vec<FeatureVersion>> {
    let mut features = Vec::new();
    for lister in LISTERS {
        let mut found = lister.list_features(files)?;
        if !found.is_empty() {
            tracing::debug!(lister = lister.name(), count = found.len(), "listed features");
        }
        features.append(&mut found);
    }
    Ok(features)
}

/// Distroless images keep their dpkg state under `status.d/`.
pub fn is_distroless(files: &LayerFiles) -> bool {
    files.contains("var/lib/dpkg/status.d/")
}
