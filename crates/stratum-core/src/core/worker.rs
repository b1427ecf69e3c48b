//! Layer ingestion: namespace detection, feature listing, persistence.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use stratum_domain::{Component, FeatureVersion, Layer, Namespace, RhelV2Layer, RhelV2Package};
use tracing::{debug, warn};

use crate::core::analyzer;
use crate::core::env::ScanConfig;
use crate::core::errors::{Result, ScanError};
use crate::core::featurefmt;
use crate::core::featurens::{self, DetectorOptions};
use crate::core::layerfiles::extract::{extract_layer_files, ExtractOptions};
use crate::core::layerfiles::LayerFiles;
use crate::core::rhelv2;
use crate::core::store::{Store, StoreOptions};

/// Engine version; bump whenever analysis output changes so stored layers
/// get re-analyzed.
pub const ENGINE_VERSION: u32 = 3;

/// Request-scoped cancellation, checked between the major ingestion phases
/// (extraction, detection, persistence). Each phase is self-contained, so a
/// canceled scan leaves no partial layer behind.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(ScanError::Canceled);
        }
        Ok(())
    }
}

/// Identity of one layer ingestion.
#[derive(Debug, Clone, Default)]
pub struct LayerRequest {
    pub image_format: String,
    pub name: String,
    pub lineage: String,
    pub parent_name: String,
    pub parent_lineage: String,
    pub uncertified_rhel: bool,
}

/// Everything detection produced for one layer.
#[derive(Debug, Default)]
pub struct DetectedContent {
    pub namespace: Option<Namespace>,
    pub distroless: bool,
    pub features: Vec<FeatureVersion>,
    pub rhelv2: Option<(Vec<RhelV2Package>, Vec<String>)>,
    pub components: Vec<Component>,
    pub removed_paths: Vec<String>,
}

/// Lineage of a child layer: a rolling digest over the ancestor names.
pub fn child_lineage(parent_lineage: &str, parent_name: &str) -> String {
    if parent_name.is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(parent_lineage.as_bytes());
    hasher.update(parent_name.as_bytes());
    hex_digest(&hasher.finalize())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Analyzes a layer tarball and persists the result.
///
/// Returns the extracted files so the caller can thread them as the symlink
/// base of the next layer; `None` means the layer was already analyzed by
/// this engine and nothing was re-done.
pub fn process_layer_from_reader<R: Read>(
    store: &Store,
    config: &ScanConfig,
    request: &LayerRequest,
    cancel: &CancelToken,
    base: Option<&LayerFiles>,
    reader: R,
) -> Result<Option<LayerFiles>> {
    let (mut layer, exists) = pre_process_layer(store, request)?;
    if exists {
        return Ok(None);
    }

    cancel.check()?;
    let options = ExtractOptions {
        executable_metadata: config.active_vuln_mgmt,
        ..ExtractOptions::default()
    };
    let mut files = extract_layer_files(reader, &options).map_err(ScanError::Other)?;
    files.merge_base_and_resolve_symlinks(base);

    cancel.check()?;
    let content = detect_content(&files, &request.name, layer.parent.as_deref(), config, request)?;
    cancel.check()?;

    if let Some((packages, cpes)) = &content.rhelv2 {
        // Certified scans persist their parallel record as well.
        let rhelv2_layer = RhelV2Layer {
            hash: layer.name.clone(),
            dist: content
                .namespace
                .as_ref()
                .map(|ns| ns.name.clone())
                .unwrap_or_default(),
            packages: packages.clone(),
            cpes: cpes.clone(),
            parent_hash: request.parent_name.clone(),
        };
        store.insert_rhelv2_layer(&rhelv2_layer)?;
    }

    layer.namespace = content.namespace;
    layer.distroless = content.distroless;
    layer.features = content.features;

    match store.insert_layer(
        &layer,
        &request.lineage,
        &request.parent_lineage,
        &content.removed_paths,
    ) {
        Ok(()) => {}
        Err(err) if err.is_benign() => return Ok(Some(files)),
        Err(err) => return Err(err),
    }
    store.insert_layer_components(
        &request.name,
        &request.lineage,
        &content.components,
        &content.removed_paths,
    )?;
    Ok(Some(files))
}

/// Validates the request and decides whether analysis is needed at all.
fn pre_process_layer(store: &Store, request: &LayerRequest) -> Result<(Layer, bool)> {
    if request.name.is_empty() {
        return Err(ScanError::bad_request(
            "could not process a layer which does not have a name",
        ));
    }
    if request.image_format.is_empty() {
        return Err(ScanError::bad_request(
            "could not process a layer which does not have a format",
        ));
    }

    match store.find_layer(&request.name, &request.lineage, &StoreOptions::default()) {
        Ok(existing) if existing.engine_version >= ENGINE_VERSION => {
            debug!(
                layer = %request.name,
                engine_version = existing.engine_version,
                "layer already analyzed, skipping"
            );
            return Ok((existing, true));
        }
        Ok(_) | Err(ScanError::NotFound) => {}
        Err(err) => return Err(err),
    }

    let mut layer = Layer {
        name: request.name.clone(),
        engine_version: ENGINE_VERSION,
        ..Layer::default()
    };
    if !request.parent_name.is_empty() {
        // The parent is loaded with its features so the namespace fallback
        // chain and the insert-time diff both see them.
        let parent = match store.find_layer(
            &request.parent_name,
            &request.parent_lineage,
            &StoreOptions::with_features(),
        ) {
            Ok(parent) => parent,
            Err(ScanError::NotFound) => {
                warn!(
                    layer = %request.name,
                    parent = %request.parent_name,
                    "parent layer is unknown, it must be processed first"
                );
                return Err(ScanError::ParentUnknown);
            }
            Err(err) => return Err(err),
        };
        layer.parent = Some(Box::new(parent));
    }
    Ok((layer, false))
}

/// Runs the detector stack over the extracted files.
fn detect_content(
    files: &LayerFiles,
    name: &str,
    parent: Option<&Layer>,
    config: &ScanConfig,
    request: &LayerRequest,
) -> Result<DetectedContent> {
    let namespace = detect_namespace(files, name, parent, request.uncertified_rhel);
    let distroless = featurefmt::is_distroless(files) || parent.is_some_and(|p| p.distroless);

    let certified = namespace
        .as_ref()
        .is_some_and(Namespace::is_rhel)
        && !request.uncertified_rhel;

    let mut content = DetectedContent {
        distroless,
        removed_paths: files.removed_files(),
        ..DetectedContent::default()
    };

    if certified {
        let (packages, cpes) = rhelv2::list_features(files, config).map_err(ScanError::Other)?;
        debug!(
            layer = %name,
            package_count = packages.len(),
            cpe_count = cpes.len(),
            "detected certified features"
        );
        content.rhelv2 = Some((packages, cpes));
    } else {
        content.features = detect_feature_versions(files, name, namespace.as_ref(), parent, config)?;
        if !content.features.is_empty() {
            debug!(layer = %name, feature_count = content.features.len(), "detected features");
        }
    }

    if config.language_vulns {
        let mut components = analyzer::analyze(files);
        if certified {
            rhelv2::annotate_components_with_package_manager_info(files, &mut components)
                .map_err(ScanError::Other)?;
        }
        content.components = components;
    }

    content.namespace = namespace;
    Ok(content)
}

/// Layer namespace, falling back to the parent's when nothing is detected.
fn detect_namespace(
    files: &LayerFiles,
    name: &str,
    parent: Option<&Layer>,
    uncertified_rhel: bool,
) -> Option<Namespace> {
    let options = DetectorOptions { uncertified_rhel };
    if let Some(namespace) = featurens::detect(files, &options) {
        return Some(namespace);
    }
    if let Some(namespace) = parent.and_then(|p| p.namespace.clone()) {
        debug!(layer = %name, namespace = %namespace, "namespace inherited from parent");
        return Some(namespace);
    }
    None
}

/// Lists features and fills their namespaces from the fallback chain:
/// parent's namespace for the same `(name, version)`, else the layer's
/// detected namespace, else the feature is unsupported.
fn detect_feature_versions(
    files: &LayerFiles,
    name: &str,
    namespace: Option<&Namespace>,
    parent: Option<&Layer>,
    config: &ScanConfig,
) -> Result<Vec<FeatureVersion>> {
    let mut features = featurefmt::list_features(files).map_err(ScanError::Other)?;

    // A layer that does not touch any package database keeps its parent's
    // view of the world.
    if features.is_empty() {
        if let Some(parent) = parent {
            return Ok(parent.features.clone());
        }
        return Ok(features);
    }

    let mut parent_namespaces: HashMap<String, Namespace> = HashMap::new();
    if let Some(parent) = parent {
        for fv in &parent.features {
            parent_namespaces.insert(fv.key(), fv.feature.namespace.clone());
        }
    }

    for fv in &mut features {
        if !fv.feature.namespace.name.is_empty() {
            continue;
        }
        if let Some(parent_namespace) = parent_namespaces.get(&fv.key()) {
            fv.feature.namespace = parent_namespace.clone();
            continue;
        }
        if let Some(namespace) = namespace {
            fv.feature.namespace = namespace.clone();
            continue;
        }
        warn!(
            layer = %name,
            feature = %fv.feature.name,
            version = %fv.version,
            "namespace unknown"
        );
        if config.continue_unknown_os {
            return Ok(Vec::new());
        }
        return Err(ScanError::Unsupported);
    }
    Ok(features)
}
