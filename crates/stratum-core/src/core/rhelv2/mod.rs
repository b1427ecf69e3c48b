//! Certified Red Hat scanning.
//!
//! Runs instead of the generic feature pipeline when a RHEL namespace was
//! detected and certified scanning was requested. Packages keep their module
//! and architecture, and the layer is paired with the CPEs of the
//! repositories recorded in its build-info content manifests so advisories
//! can be narrowed by CPE.

use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;
use stratum_domain::{Component, RhelV2Package};
use tracing::{debug, warn};

use crate::core::env::ScanConfig;
use crate::core::featurefmt::rpm::{materialize_rpm_db, query_rpm};
use crate::core::layerfiles::LayerFiles;

pub mod mapping;

const CONTENT_MANIFEST_DIR: &str = "root/buildinfo/content_manifests/";

const QUERY_FORMAT: &str = "%{NAME}|%{EPOCHNUM}|%{VERSION}|%{RELEASE}|%{ARCH}|%{MODULARITYLABEL}\n";

/// Build-info manifest carried by certified images.
#[derive(Debug, Deserialize)]
struct ContentManifest {
    #[serde(default)]
    content_sets: Vec<String>,
}

/// Lists the layer's RPM packages and the CPEs of its content sets.
pub fn list_features(
    files: &LayerFiles,
    config: &ScanConfig,
) -> Result<(Vec<RhelV2Package>, Vec<String>)> {
    let cpes = content_set_cpes(files, config)?;

    let Some(dbdir) = materialize_rpm_db(files)? else {
        return Ok((Vec::new(), cpes));
    };
    let Some(output) = query_rpm(dbdir.path(), &["-qa", "--qf", QUERY_FORMAT]) else {
        return Ok((Vec::new(), cpes));
    };

    let mut packages = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split('|').collect();
        let [name, epoch, version, release, arch, module] = fields.as_slice() else {
            continue;
        };
        if *name == "gpg-pubkey" {
            continue;
        }
        let version = if *epoch == "0" || epoch.is_empty() {
            format!("{version}-{release}")
        } else {
            format!("{epoch}:{version}-{release}")
        };
        packages.push(RhelV2Package {
            name: (*name).to_string(),
            version,
            module: normalize_module(module),
            arch: (*arch).to_string(),
            ..RhelV2Package::default()
        });
    }

    attach_executable_metadata(files, dbdir.path(), &mut packages);
    debug!(
        package_count = packages.len(),
        cpe_count = cpes.len(),
        "certified feature listing complete"
    );
    Ok((packages, cpes))
}

/// `name:stream:version:context` → `name:stream`.
fn normalize_module(label: &str) -> String {
    if label.is_empty() || label == "(none)" {
        return String::new();
    }
    label.split(':').take(2).collect::<Vec<_>>().join(":")
}

fn content_set_cpes(files: &LayerFiles, config: &ScanConfig) -> Result<Vec<String>> {
    let mapping = match &config.repo_to_cpe_dir {
        Some(dir) => mapping::RepoCpeMapping::load_dir(dir)?,
        None => return Ok(Vec::new()),
    };

    let mut content_sets = Vec::new();
    for (path, data) in files.files() {
        if !path.starts_with(CONTENT_MANIFEST_DIR) || !path.ends_with(".json") {
            continue;
        }
        match serde_json::from_slice::<ContentManifest>(&data.contents) {
            Ok(manifest) => content_sets.extend(manifest.content_sets),
            Err(err) => warn!(%err, %path, "unparseable content manifest"),
        }
    }
    Ok(mapping.cpes_for(&content_sets))
}

/// Pairs ELF metadata of executable files with the package providing them.
fn attach_executable_metadata(
    files: &LayerFiles,
    dbdir: &std::path::Path,
    packages: &mut [RhelV2Package],
) {
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (index, package) in packages.iter().enumerate() {
        by_name.insert(package.name.clone(), index);
    }

    for (path, data) in files.files() {
        let Some(metadata) = &data.elf_metadata else {
            continue;
        };
        let Some(provider) = provider_name(dbdir, path) else {
            continue;
        };
        let Some(&index) = by_name.get(provider.as_str()) else {
            continue;
        };
        let package = &mut packages[index];
        let imports = metadata.imported_libraries.iter().cloned().collect();
        if metadata.sonames.is_empty() {
            package
                .executable_to_dependencies
                .insert(format!("/{path}"), imports);
        } else {
            for soname in &metadata.sonames {
                package
                    .library_to_dependencies
                    .insert(soname.clone(), metadata.imported_libraries.iter().cloned().collect());
            }
        }
    }
}

fn provider_name(dbdir: &std::path::Path, path: &str) -> Option<String> {
    let full_path = format!("/{path}");
    let output = query_rpm(dbdir, &["-q", "--whatprovides", "--qf", "%{NAME}\n", &full_path])?;
    output.lines().next().map(str::to_string)
}

/// Marks components delivered by the package manager.
///
/// Nested locations (`a.jar:b.jar`) are collapsed to their outermost path;
/// answers are memoized per normalized path because many components share an
/// artifact.
pub fn annotate_components_with_package_manager_info(
    files: &LayerFiles,
    components: &mut [Component],
) -> Result<()> {
    if components.is_empty() {
        return Ok(());
    }
    let Some(dbdir) = materialize_rpm_db(files)? else {
        return Ok(());
    };

    let mut checked: HashMap<String, bool> = HashMap::new();
    for component in components.iter_mut() {
        let location = component.outermost_location().to_string();
        let provided = match checked.get(&location) {
            Some(answer) => *answer,
            None => {
                let full_path = format!("/{location}");
                let answer =
                    query_rpm(dbdir.path(), &["-q", "--whatprovides", &full_path]).is_some();
                checked.insert(location, answer);
                answer
            }
        };
        component.from_package_manager = provided;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::featurens::testutil::layer_with_files;

    #[test]
    fn module_labels_are_normalized() {
        assert_eq!(normalize_module("nodejs:12:8030020201124152102:229f0a1c"), "nodejs:12");
        assert_eq!(normalize_module("(none)"), "");
        assert_eq!(normalize_module(""), "");
    }

    #[test]
    fn no_mapping_dir_means_no_cpes() {
        let files = layer_with_files(&[(
            "root/buildinfo/content_manifests/layer.json",
            r#"{"content_sets": ["rhel-8-for-x86_64-baseos-rpms"]}"#,
        )]);
        let cpes = content_set_cpes(&files, &ScanConfig::default()).unwrap();
        assert!(cpes.is_empty());
    }

    #[test]
    fn content_sets_map_through_the_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("repository-to-cpe.json"),
            r#"{"data": {"rhel-8-for-x86_64-baseos-rpms": {"cpes": ["cpe:/o:redhat:enterprise_linux:8::baseos"]}}}"#,
        )
        .unwrap();

        let files = layer_with_files(&[(
            "root/buildinfo/content_manifests/layer.json",
            r#"{"content_sets": ["rhel-8-for-x86_64-baseos-rpms", "unmapped-repo"]}"#,
        )]);
        let config = ScanConfig {
            repo_to_cpe_dir: Some(dir.path().to_path_buf()),
            ..ScanConfig::default()
        };
        let cpes = content_set_cpes(&files, &config).unwrap();
        assert_eq!(cpes, vec!["cpe:/o:redhat:enterprise_linux:8::baseos"]);
    }
}
