//! Distribution namespace detection.
//!
//! Detectors inspect a short fixed list of files each and run in a fixed
//! order; the first one that recognizes the layer wins. No detector guesses:
//! a layer without identification stays namespace-less and inherits from its
//! parent at persistence time.

use stratum_domain::Namespace;

use crate::core::layerfiles::LayerFiles;

mod apt_sources;
mod lsb_release;
mod os_release;
mod redhat_release;

#[derive(Debug, Clone, Copy, Default)]
pub struct DetectorOptions {
    /// Treat Red Hat Enterprise Linux layers as their CentOS equivalent
    /// instead of entering the certified pipeline.
    pub uncertified_rhel: bool,
}

pub(crate) trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, files: &LayerFiles, options: &DetectorOptions) -> Option<Namespace>;
}

static DETECTORS: &[&dyn Detector] = &[
    &os_release::OsReleaseDetector,
    &lsb_release::LsbReleaseDetector,
    &apt_sources::AptSourcesDetector,
    &redhat_release::RedhatReleaseDetector,
];

/// Runs the detector chain; first non-empty answer wins.
pub fn detect(files: &LayerFiles, options: &DetectorOptions) -> Option<Namespace> {
    for detector in DETECTORS {
        if let Some(namespace) = detector.detect(files, options) {
            tracing::debug!(detector = detector.name(), namespace = %namespace, "detected namespace");
            return Some(namespace);
        }
    }
    None
}

/// Version-comparison discipline for a distribution id; `None` for
/// distributions the scanner does not support.
pub(crate) fn version_format_for(distro: &str) -> Option<&'static str> {
    match distro {
        "debian" | "ubuntu" => Some("dpkg"),
        "alpine" => Some("apk"),
        "centos" | "rhel" | "oracle" | "amzn" => Some("rpm"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;

    use crate::core::layerfiles::{FileData, LayerFiles};

    pub(crate) fn layer_with_files(entries: &[(&str, &str)]) -> LayerFiles {
        let data: HashMap<String, FileData> = entries
            .iter()
            .map(|(path, contents)| {
                (
                    (*path).to_string(),
                    FileData {
                        contents: contents.as_bytes().to_vec(),
                        ..FileData::default()
                    },
                )
            })
            .collect();
        LayerFiles::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::layer_with_files;
    use super::*;

    #[test]
    fn chain_prefers_os_release() {
        let files = layer_with_files(&[
            ("etc/os-release", "ID=debian\nVERSION_ID=\"10\"\n"),
            ("etc/centos-release", "CentOS Linux release 8.3.2011\n"),
        ]);
        let ns = detect(&files, &DetectorOptions::default()).expect("namespace");
        assert_eq!(ns.name, "debian:10");
        assert_eq!(ns.version_format, "dpkg");
    }

    #[test]
    fn empty_layer_detects_nothing() {
        let files = layer_with_files(&[]);
        assert!(detect(&files, &DetectorOptions::default()).is_none());
    }
}
