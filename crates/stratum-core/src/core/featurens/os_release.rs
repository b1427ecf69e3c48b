//! `os-release` namespace detection (`ID` + `VERSION_ID`).

use stratum_domain::Namespace;

use super::{version_format_for, Detector, DetectorOptions};
use crate::core::layerfiles::LayerFiles;

const CANDIDATE_FILES: &[&str] = &["etc/os-release", "usr/lib/os-release"];

pub(super) struct OsReleaseDetector;

impl Detector for OsReleaseDetector {
    fn name(&self) -> &'static str {
        "os-release"
    }

    fn detect(&self, files: &LayerFiles, options: &DetectorOptions) -> Option<Namespace> {
        let contents = CANDIDATE_FILES
            .iter()
            .find_map(|path| files.get(path))
            .map(|data| String::from_utf8_lossy(&data.contents).into_owned())?;

        let mut id = None;
        let mut version_id = None;
        for line in contents.lines() {
            if let Some(value) = line.strip_prefix("ID=") {
                id = Some(unquote(value).to_ascii_lowercase());
            } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
                version_id = Some(unquote(value).to_string());
            }
        }

        build_namespace(id.as_deref()?, version_id.as_deref()?, options)
    }
}

fn build_namespace(id: &str, version: &str, options: &DetectorOptions) -> Option<Namespace> {
    if version.is_empty() {
        return None;
    }
    let format = version_format_for(id)?;
    match id {
        "alpine" => {
            // Alpine advisories are scoped per minor release.
            let minor = version.splitn(3, '.').take(2).collect::<Vec<_>>().join(".");
            Some(Namespace::new(format!("alpine:{minor}"), format))
        }
        "rhel" => {
            let major = version.split('.').next()?;
            if options.uncertified_rhel {
                Some(Namespace::new(format!("centos:{major}"), format))
            } else {
                Some(Namespace::new(format!("rhel:{major}"), format))
            }
        }
        _ => Some(Namespace::new(format!("{id}:{version}"), format)),
    }
}

/// Strips one layer of optional quoting.
fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::layer_with_files;
    use super::*;

    fn detect(contents: &str, uncertified: bool) -> Option<Namespace> {
        let files = layer_with_files(&[("etc/os-release", contents)]);
        OsReleaseDetector.detect(
            &files,
            &DetectorOptions {
                uncertified_rhel: uncertified,
            },
        )
    }

    #[test]
    fn debian_with_quoted_version() {
        let ns = detect(
            "PRETTY_NAME=\"Debian GNU/Linux 8 (jessie)\"\nNAME=\"Debian GNU/Linux\"\nVERSION_ID=\"8\"\nID=debian\n",
            false,
        )
        .unwrap();
        assert_eq!(ns.name, "debian:8");
        assert_eq!(ns.version_format, "dpkg");
    }

    #[test]
    fn ubuntu_without_quotes() {
        let ns = detect("NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=15.10\n", false).unwrap();
        assert_eq!(ns.name, "ubuntu:15.10");
    }

    #[test]
    fn alpine_truncates_to_minor() {
        let ns = detect("ID=alpine\nVERSION_ID=3.18.4\n", false).unwrap();
        assert_eq!(ns.name, "alpine:3.18");
        assert_eq!(ns.version_format, "apk");
    }

    #[test]
    fn fedora_is_unsupported() {
        assert!(detect("NAME=Fedora\nID=fedora\nVERSION_ID=20\n", false).is_none());
    }

    #[test]
    fn rhel_respects_uncertified_flag() {
        let certified = detect("ID=\"rhel\"\nVERSION_ID=\"8.4\"\n", false).unwrap();
        assert_eq!(certified.name, "rhel:8");
        let uncertified = detect("ID=\"rhel\"\nVERSION_ID=\"8.4\"\n", true).unwrap();
        assert_eq!(uncertified.name, "centos:8");
    }

    #[test]
    fn missing_version_id_detects_nothing() {
        assert!(detect("ID=debian\n", false).is_none());
    }
}
