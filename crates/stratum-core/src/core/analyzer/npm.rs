//! Node module analysis (`node_modules/**/package.json`).

use serde::Deserialize;
use stratum_domain::{Component, SourceType};
use tracing::debug;

use crate::core::layerfiles::{path_base, path_dir, LayerFiles};

use super::Analyzer;

#[derive(Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
}

pub(super) struct NpmAnalyzer;

impl Analyzer for NpmAnalyzer {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn analyze(&self, files: &LayerFiles) -> Vec<Component> {
        let mut components = Vec::new();
        for (path, data) in files.files() {
            // Application manifests outside node_modules describe the app
            // itself, not an installed dependency.
            if path_base(path) != "package.json" || !path.contains("node_modules/") {
                continue;
            }
            let manifest: PackageJson = match serde_json::from_slice(&data.contents) {
                Ok(manifest) => manifest,
                Err(err) => {
                    debug!(%err, %path, "unparseable package.json");
                    continue;
                }
            };
            let (Some(name), Some(version)) = (manifest.name, manifest.version) else {
                continue;
            };
            if name.is_empty() || version.is_empty() {
                continue;
            }
            components.push(Component::new(name, version, SourceType::Npm, path_dir(path)));
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::featurens::testutil::layer_with_files;

    #[test]
    fn finds_installed_modules() {
        let files = layer_with_files(&[
            (
                "app/node_modules/lodash/package.json",
                r#"{"name": "lodash", "version": "4.17.21"}"#,
            ),
            ("app/package.json", r#"{"name": "my-app", "version": "1.0.0"}"#),
        ]);
        let components = NpmAnalyzer.analyze(&files);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "lodash");
        assert_eq!(components[0].location, "app/node_modules/lodash");
    }

    #[test]
    fn malformed_manifests_are_skipped() {
        let files = layer_with_files(&[(
            "app/node_modules/broken/package.json",
            "{not valid json",
        )]);
        assert!(NpmAnalyzer.analyze(&files).is_empty());
    }
}
