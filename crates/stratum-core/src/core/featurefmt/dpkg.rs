//! dpkg status-file parsing.

use std::collections::HashSet;

use anyhow::Result;
use stratum_domain::{Feature, FeatureVersion, Namespace};
use tracing::debug;

use crate::core::layerfiles::LayerFiles;

use super::Lister;

const STATUS_FILE: &str = "var/lib/dpkg/status";
const DISTROLESS_STATUS_DIR: &str = "var/lib/dpkg/status.d/";

pub(super) struct DpkgLister;

impl Lister for DpkgLister {
    fn name(&self) -> &'static str {
        "dpkg"
    }

    fn list_features(&self, files: &LayerFiles) -> Result<Vec<FeatureVersion>> {
        let mut seen = HashSet::new();
        let mut features = Vec::new();

        if let Some(data) = files.get(STATUS_FILE) {
            let contents = String::from_utf8_lossy(&data.contents);
            collect_stanzas(&contents, true, &mut seen, &mut features);
        }

        // Distroless images carry one status fragment per package, without
        // Status lines.
        for (path, data) in files.files() {
            if !path.starts_with(DISTROLESS_STATUS_DIR) || path.ends_with('/') {
                continue;
            }
            let contents = String::from_utf8_lossy(&data.contents);
            collect_stanzas(&contents, false, &mut seen, &mut features);
        }

        Ok(features)
    }
}

fn collect_stanzas(
    contents: &str,
    require_installed: bool,
    seen: &mut HashSet<(String, String)>,
    out: &mut Vec<FeatureVersion>,
) {
    for stanza in contents.split("\n\n") {
        let Some(parsed) = parse_stanza(stanza, require_installed) else {
            continue;
        };
        if seen.insert(parsed.clone()) {
            let (name, version) = parsed;
            out.push(FeatureVersion::new(
                Feature::new(Namespace::default(), name),
                version,
            ));
        }
    }
}

fn parse_stanza(stanza: &str, require_installed: bool) -> Option<(String, String)> {
    let mut package = None;
    let mut source = None;
    let mut source_version = None;
    let mut version = None;
    let mut installed = !require_installed;

    for line in stanza.lines() {
        if let Some(value) = line.strip_prefix("Package: ") {
            package = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Status: ") {
            installed = value.trim().ends_with(" installed") || value.trim() == "installed";
        } else if let Some(value) = line.strip_prefix("Source: ") {
            // `Source: pkg (version)` pins the source version explicitly.
            let value = value.trim();
            match value.split_once(' ') {
                Some((name, rest)) => {
                    source = Some(name.to_string());
                    source_version = rest
                        .trim()
                        .strip_prefix('(')
                        .and_then(|v| v.strip_suffix(')'))
                        .map(str::to_string);
                }
                None => source = Some(value.to_string()),
            }
        } else if let Some(value) = line.strip_prefix("Version: ") {
            version = Some(value.trim().to_string());
        }
    }

    if !installed {
        debug!(package = package.as_deref().unwrap_or(""), "skipping non-installed stanza");
        return None;
    }
    let name = source.or(package)?;
    let version = source_version.or(version)?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version))
}

#[cfg(test)]
mod tests {
    use super::super::list_features;
    use super::*;
    use crate::core::featurens::testutil::layer_with_files;

    #[test]
    fn lists_installed_packages_only() {
        let status = "Package: openssl\nStatus: install ok installed\nVersion: 1.0\n\n\
                      Package: removed-tool\nStatus: deinstall ok config-files\nVersion: 9.9\n\n\
                      Package: bash\nStatus: install ok installed\nVersion: 5.0-4\n";
        let files = layer_with_files(&[("var/lib/dpkg/status", status)]);
        let features = DpkgLister.list_features(&files).unwrap();
        let mut names: Vec<&str> = features.iter().map(|f| f.feature.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["bash", "openssl"]);
    }

    #[test]
    fn source_package_overrides_binary_name() {
        let status = "Package: libssl1.1\nStatus: install ok installed\n\
                      Source: openssl (1.1.1n-0+deb10u3)\nVersion: 1.1.1n-0+deb10u6\n";
        let files = layer_with_files(&[("var/lib/dpkg/status", status)]);
        let features = DpkgLister.list_features(&files).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].feature.name, "openssl");
        assert_eq!(features[0].version, "1.1.1n-0+deb10u3");
    }

    #[test]
    fn distroless_fragments_need_no_status_line() {
        let files = layer_with_files(&[(
            "var/lib/dpkg/status.d/base",
            "Package: base-files\nVersion: 10.3\n",
        )]);
        let features = DpkgLister.list_features(&files).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].feature.name, "base-files");
    }

    #[test]
    fn duplicate_entries_collapse() {
        let status = "Package: zlib1g\nStatus: install ok installed\nSource: zlib\nVersion: 1.2\n";
        let files = layer_with_files(&[
            ("var/lib/dpkg/status", status),
            ("var/lib/dpkg/status.d/zlib", "Package: zlib\nVersion: 1.2\n"),
        ]);
        let features = list_features(&files).unwrap();
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn namespaces_start_empty() {
        let files = layer_with_files(&[(
            "var/lib/dpkg/status",
            "Package: bash\nStatus: install ok installed\nVersion: 5.0\n",
        )]);
        let features = DpkgLister.list_features(&files).unwrap();
        assert!(features[0].feature.namespace.name.is_empty());
    }
}
