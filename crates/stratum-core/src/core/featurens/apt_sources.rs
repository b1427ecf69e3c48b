//! `apt/sources.list` namespace heuristic.
//!
//! Used for Debian and Ubuntu layers whose `os-release` lacks a version
//! (e.g. testing/unstable images): the suite name of the first recognized
//! source line maps through the release tables.

use stratum_domain::{releases, Namespace};

use super::{Detector, DetectorOptions};
use crate::core::layerfiles::LayerFiles;

pub(super) struct AptSourcesDetector;

impl Detector for AptSourcesDetector {
    fn name(&self) -> &'static str {
        "apt-sources"
    }

    fn detect(&self, files: &LayerFiles, _options: &DetectorOptions) -> Option<Namespace> {
        let data = files.get("etc/apt/sources.list")?;
        let contents = String::from_utf8_lossy(&data.contents);

        for line in contents.lines() {
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("deb" | "deb-src") => {}
                _ => continue,
            }
            // deb [options] url suite components...
            let Some(first) = tokens.next() else {
                continue;
            };
            // Bracketed options push the URL one token later.
            if first.starts_with('[') && tokens.next().is_none() {
                continue;
            }
            let Some(suite) = tokens.next() else {
                continue;
            };
            // `stretch-updates` and friends carry the release up front.
            let release = suite.split('-').next().unwrap_or(suite);
            if let Some(version) = releases::debian_version(release) {
                return Some(Namespace::new(format!("debian:{version}"), "dpkg"));
            }
            if let Some(version) = releases::ubuntu_version(release) {
                return Some(Namespace::new(format!("ubuntu:{version}"), "dpkg"));
            }
        }
        None
    }
}
