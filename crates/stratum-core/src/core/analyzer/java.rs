//! Java archive analysis (jar/war/ear, including nested archives).

use std::io::{Cursor, Read};

use stratum_domain::{Component, JavaAttributes, SourceType};
use tracing::debug;
use zip::ZipArchive;

use crate::core::layerfiles::{path_base, LayerFiles};

use super::Analyzer;

/// Nested archives deeper than this are ignored.
const MAX_NESTING: usize = 3;

/// Guards against decompression bombs inside nested entries.
const MAX_NESTED_ENTRY_SIZE: u64 = 512 * 1024 * 1024;

pub(super) struct JavaAnalyzer;

impl Analyzer for JavaAnalyzer {
    fn name(&self) -> &'static str {
        "java"
    }

    fn analyze(&self, files: &LayerFiles) -> Vec<Component> {
        let mut components = Vec::new();
        for (path, data) in files.files() {
            if !is_java_archive(path) || data.contents.is_empty() {
                continue;
            }
            analyze_archive(path, &data.contents, 0, &mut components);
        }
        components
    }
}

fn is_java_archive(path: &str) -> bool {
    path.ends_with(".jar") || path.ends_with(".war") || path.ends_with(".ear")
}

fn analyze_archive(location: &str, contents: &[u8], depth: usize, out: &mut Vec<Component>) {
    if depth >= MAX_NESTING {
        return;
    }
    let mut archive = match ZipArchive::new(Cursor::new(contents)) {
        Ok(archive) => archive,
        Err(err) => {
            debug!(%err, location, "unreadable java archive");
            return;
        }
    };

    let mut manifest: Option<JavaAttributes> = None;
    let mut pom_components = Vec::new();
    let mut nested: Vec<(String, Vec<u8>)> = Vec::new();

    for index in 0..archive.len() {
        let Ok(mut entry) = archive.by_index(index) else {
            continue;
        };
        let entry_name = entry.name().to_string();
        if entry_name == "META-INF/MANIFEST.MF" {
            let mut text = String::new();
            if entry.read_to_string(&mut text).is_ok() {
                manifest = Some(parse_manifest(&text));
            }
        } else if entry_name.starts_with("META-INF/maven/") && entry_name.ends_with("pom.properties")
        {
            let mut text = String::new();
            if entry.read_to_string(&mut text).is_ok() {
                if let Some(component) = component_from_pom(location, &text) {
                    pom_components.push(component);
                }
            }
        } else if is_java_archive(&entry_name) && entry.size() <= MAX_NESTED_ENTRY_SIZE {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            if entry.read_to_end(&mut bytes).is_ok() {
                nested.push((format!("{location}:{entry_name}"), bytes));
            }
        }
    }

    if !pom_components.is_empty() {
        out.append(&mut pom_components);
    } else if let Some((name, version)) = identity_from_archive(location, manifest.as_ref()) {
        let mut component = Component::new(name, version, SourceType::Java, location);
        component.java_attributes = manifest;
        out.push(component);
    }

    for (nested_location, bytes) in nested {
        analyze_archive(&nested_location, &bytes, depth + 1, out);
    }
}

fn parse_manifest(text: &str) -> JavaAttributes {
    let mut attributes = JavaAttributes::default();
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("Implementation-Version:") {
            attributes.implementation_version = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Specification-Version:") {
            attributes.specification_version = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Implementation-Vendor:") {
            attributes.origins.push(value.trim().to_string());
        }
    }
    attributes
}

fn component_from_pom(location: &str, properties: &str) -> Option<Component> {
    let mut artifact = None;
    let mut version = None;
    for line in properties.lines() {
        if let Some(value) = line.strip_prefix("artifactId=") {
            artifact = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("version=") {
            version = Some(value.trim().to_string());
        }
    }
    Some(Component::new(artifact?, version?, SourceType::Java, location))
}

/// Derives `(name, version)` from the archive filename, preferring the
/// manifest's implementation version when the filename carries none.
fn identity_from_archive(
    location: &str,
    manifest: Option<&JavaAttributes>,
) -> Option<(String, String)> {
    // The basename of the innermost segment identifies the artifact.
    let innermost = location.rsplit(':').next().unwrap_or(location);
    let base = path_base(innermost);
    let stem = base
        .strip_suffix(".jar")
        .or_else(|| base.strip_suffix(".war"))
        .or_else(|| base.strip_suffix(".ear"))?;

    if let Some((name, version)) = split_versioned_name(stem) {
        return Some((name.to_string(), version.to_string()));
    }
    let manifest_version = manifest
        .map(|m| m.implementation_version.as_str())
        .filter(|v| !v.is_empty())?;
    Some((stem.to_string(), manifest_version.to_string()))
}

/// Splits `name-1.2.3` style stems at the last dash followed by a digit.
fn split_versioned_name(stem: &str) -> Option<(&str, &str)> {
    let (name, version) = stem.rsplit_once('-')?;
    if version.starts_with(|c: char| c.is_ascii_digit()) && !name.is_empty() {
        Some((name, version))
    } else {
        None
    }
}
