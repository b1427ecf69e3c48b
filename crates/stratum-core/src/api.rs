//! Intended public surface for service collaborators.
//!
//! The RPC/HTTP layer, registry client and CLI all drive the core through
//! these entry points; nothing here knows about wire formats.

use std::collections::HashMap;
use std::io::Read;

use stratum_domain::{
    Feature, FeatureVersion, Namespace, RhelV2Layer, RhelV2Package, Vulnerability,
};

use crate::core::env::ScanConfig;
use crate::core::errors::{Result, ScanError};
use crate::core::matcher;
use crate::core::nvdcache::MetadataCache;
use crate::core::store::{LayerComponents, Store, StoreOptions};
use crate::core::worker::{self, CancelToken, LayerRequest};

/// Image format accepted by this scanner.
pub const IMAGE_FORMAT: &str = "Docker";

/// Reference to a scanned image: exactly one of name or digest.
#[derive(Debug, Clone)]
pub struct ImageRef {
    name: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn from_parts(name: Option<String>, digest: Option<String>) -> Result<Self> {
        let name = name.filter(|n| !n.is_empty());
        let digest = digest.filter(|d| !d.is_empty());
        match (&name, &digest) {
            (None, None) => Err(ScanError::bad_request(
                "either an image name or a digest is required",
            )),
            (Some(_), Some(_)) => Err(ScanError::bad_request(
                "image name and digest are mutually exclusive",
            )),
            _ => Ok(Self { name, digest }),
        }
    }

    pub fn by_name(name: impl Into<String>) -> Result<Self> {
        Self::from_parts(Some(name.into()), None)
    }

    pub fn by_digest(digest: impl Into<String>) -> Result<Self> {
        Self::from_parts(None, Some(digest.into()))
    }

    fn resolve(&self, store: &Store) -> Result<(String, String)> {
        let resolved = match (&self.name, &self.digest) {
            (_, Some(digest)) => store.get_layer_by_digest(digest)?,
            (Some(name), _) => store.get_layer_by_name(name)?,
            _ => None,
        };
        resolved.ok_or(ScanError::NotFound)
    }
}

/// One layer tarball of an image, top-most last.
pub struct LayerSource<R> {
    pub name: String,
    pub reader: R,
}

/// A scan request: the image's ordered layers plus its external identity.
pub struct ScanRequest<R> {
    pub image: String,
    pub digest: String,
    pub layers: Vec<LayerSource<R>>,
    pub uncertified_rhel: bool,
    /// Honored between ingestion phases; a canceled request leaves no
    /// partially persisted layer.
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub digest: String,
    pub tagged_name: String,
}

/// Ingests every layer of an image in order; returns once the top layer is
/// persisted and the image row is registered.
pub fn scan_image<R: Read>(
    store: &Store,
    config: &ScanConfig,
    request: ScanRequest<R>,
) -> Result<ScanResult> {
    if request.image.is_empty() {
        return Err(ScanError::bad_request("image name is required"));
    }
    if request.layers.is_empty() {
        return Err(ScanError::bad_request("image has no layers"));
    }

    let mut parent_name = String::new();
    let mut parent_lineage = String::new();
    let mut base = None;
    for source in request.layers {
        let lineage = worker::child_lineage(&parent_lineage, &parent_name);
        let layer_request = LayerRequest {
            image_format: IMAGE_FORMAT.to_string(),
            name: source.name.clone(),
            lineage: lineage.clone(),
            parent_name: parent_name.clone(),
            parent_lineage: parent_lineage.clone(),
            uncertified_rhel: request.uncertified_rhel,
        };
        base = worker::process_layer_from_reader(
            store,
            config,
            &layer_request,
            &request.cancel,
            base.as_ref(),
            source.reader,
        )?;
        parent_lineage = lineage;
        parent_name = source.name;
    }

    let digest = if request.digest.is_empty() {
        parent_name.clone()
    } else {
        request.digest
    };
    store.register_image(&request.image, &digest, &parent_name, &parent_lineage)?;
    Ok(ScanResult {
        digest,
        tagged_name: request.image,
    })
}

/// The assembled scan of an image: its features with correlated
/// vulnerabilities, plus the deduplicated vulnerability list.
#[derive(Debug, Clone, Default)]
pub struct ImageScan {
    pub features: Vec<FeatureVersion>,
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Loads the scan result for a previously ingested image.
pub fn get_image_scan(
    store: &Store,
    cache: &MetadataCache,
    image: &ImageRef,
    uncertified_rhel: bool,
) -> Result<ImageScan> {
    let (layer_name, lineage) = image.resolve(store)?;

    if !uncertified_rhel {
        // Certified images carry a parallel record keyed by layer hash.
        match store.get_rhelv2_layer_chain(&layer_name) {
            Ok(chain) => return certified_scan(store, cache, &chain),
            Err(ScanError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }

    let layer = store.find_layer(&layer_name, &lineage, &StoreOptions::with_vulnerabilities())?;
    let mut features = layer.features;
    for feature in &mut features {
        for vulnerability in &mut feature.affected_by {
            cache.enrich(vulnerability);
        }
    }
    let vulnerabilities = collect_vulnerabilities(&features);
    Ok(ImageScan {
        features,
        vulnerabilities,
    })
}

/// Language components per layer of the image's chain.
pub fn get_language_level_components(
    store: &Store,
    image: &ImageRef,
    _uncertified_rhel: bool,
) -> Result<Vec<LayerComponents>> {
    let (layer_name, lineage) = image.resolve(store)?;
    store.get_layer_language_components(&layer_name, &lineage)
}

fn certified_scan(
    store: &Store,
    cache: &MetadataCache,
    chain: &[RhelV2Layer],
) -> Result<ImageScan> {
    // Later layers supersede earlier installations of the same package.
    let mut packages: HashMap<(String, String, String), RhelV2Package> = HashMap::new();
    let mut cpes: Vec<String> = Vec::new();
    let mut dist = String::new();
    for layer in chain {
        for package in &layer.packages {
            packages.insert(
                (
                    package.name.clone(),
                    package.module.clone(),
                    package.arch.clone(),
                ),
                package.clone(),
            );
        }
        cpes.extend(layer.cpes.iter().cloned());
        if !layer.dist.is_empty() {
            dist = layer.dist.clone();
        }
    }
    cpes.sort();
    cpes.dedup();

    let advisories = store.rhelv2_vulnerabilities_for_cpes(&cpes)?;
    let namespace = Namespace::new(dist, "rpm");

    let mut features = Vec::new();
    for package in packages.into_values() {
        let mut feature = FeatureVersion::new(
            Feature::new(namespace.clone(), package.name.clone()),
            package.version.clone(),
        );
        feature.executable_to_dependencies = package.executable_to_dependencies.clone();
        feature.library_to_dependencies = package.library_to_dependencies.clone();
        for (advisory, fixed_by) in matcher::rhelv2_affecting(&package, &advisories) {
            let mut vulnerability = Vulnerability {
                name: advisory.name,
                namespace: namespace.clone(),
                description: advisory.description,
                link: advisory.link,
                severity: advisory.severity,
                fixed_by,
                ..Vulnerability::default()
            };
            cache.enrich(&mut vulnerability);
            feature.affected_by.push(vulnerability);
        }
        features.push(feature);
    }
    features.sort_by(|a, b| a.feature.name.cmp(&b.feature.name));

    let vulnerabilities = collect_vulnerabilities(&features);
    Ok(ImageScan {
        features,
        vulnerabilities,
    })
}

fn collect_vulnerabilities(features: &[FeatureVersion]) -> Vec<Vulnerability> {
    let mut seen = HashMap::new();
    for feature in features {
        for vulnerability in &feature.affected_by {
            seen.entry((vulnerability.namespace.name.clone(), vulnerability.name.clone()))
                .or_insert_with(|| vulnerability.clone());
        }
    }
    let mut vulnerabilities: Vec<Vulnerability> = seen.into_values().collect();
    vulnerabilities.sort_by(|a, b| a.name.cmp(&b.name));
    vulnerabilities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_ref_requires_exactly_one_identifier() {
        assert!(matches!(
            ImageRef::from_parts(None, None),
            Err(ScanError::BadRequest(_))
        ));
        assert!(matches!(
            ImageRef::from_parts(Some("img".into()), Some("sha".into())),
            Err(ScanError::BadRequest(_))
        ));
        assert!(ImageRef::by_name("quay.io/app:1.0").is_ok());
        assert!(ImageRef::by_digest("sha256:abc").is_ok());
        // Empty strings count as absent.
        assert!(ImageRef::from_parts(Some(String::new()), None).is_err());
    }
}
