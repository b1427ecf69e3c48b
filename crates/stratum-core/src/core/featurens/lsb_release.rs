//! `lsb-release` namespace detection (`DISTRIB_ID` + `DISTRIB_RELEASE`).

use stratum_domain::Namespace;

use super::{version_format_for, Detector, DetectorOptions};
use crate::core::layerfiles::LayerFiles;

pub(super) struct LsbReleaseDetector;

impl Detector for LsbReleaseDetector {
    fn name(&self) -> &'static str {
        "lsb-release"
    }

    fn detect(&self, files: &LayerFiles, _options: &DetectorOptions) -> Option<Namespace> {
        let data = files.get("etc/lsb-release")?;
        let contents = String::from_utf8_lossy(&data.contents);

        let mut id = None;
        let mut release = None;
        for line in contents.lines() {
            if let Some(value) = line.strip_prefix("DISTRIB_ID=") {
                id = Some(unquote(value).to_ascii_lowercase());
            } else if let Some(value) = line.strip_prefix("DISTRIB_RELEASE=") {
                release = Some(unquote(value).to_string());
            }
        }

        let id = id?;
        let release = release?;
        if release.is_empty() {
            return None;
        }
        let format = version_format_for(&id)?;
        Some(Namespace::new(format!("{id}:{release}"), format))
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
