//! Red Hat family release-file detection.
//!
//! Covers the `redhat-release` / `centos-release` / `oracle-release` /
//! `system-release` files written by RPM-based distributions. RHEL maps to
//! `rhel:<major>` unless uncertified scanning was requested, in which case
//! the CentOS equivalent namespace is used.

use std::sync::OnceLock;

use regex::Regex;
use stratum_domain::Namespace;

use super::{Detector, DetectorOptions};
use crate::core::layerfiles::LayerFiles;

const CANDIDATE_FILES: &[&str] = &[
    "etc/oracle-release",
    "etc/centos-release",
    "etc/redhat-release",
    "etc/system-release",
];

pub(super) struct RedhatReleaseDetector;

impl Detector for RedhatReleaseDetector {
    fn name(&self) -> &'static str {
        "redhat-release"
    }

    fn detect(&self, files: &LayerFiles, options: &DetectorOptions) -> Option<Namespace> {
        for path in CANDIDATE_FILES {
            let Some(data) = files.get(path) else {
                continue;
            };
            let contents = String::from_utf8_lossy(&data.contents);
            if let Some(namespace) = match_release(contents.trim(), options) {
                return Some(namespace);
            }
        }
        None
    }
}

struct Patterns {
    oracle: Regex,
    centos: Regex,
    rhel: Regex,
    amzn_2: Regex,
    amzn_ami: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        oracle: Regex::new(r"Oracle Linux (Server )?release (\d+)").unwrap(),
        centos: Regex::new(r"CentOS (Linux |Stream )?release (\d+)").unwrap(),
        rhel: Regex::new(r"Red Hat Enterprise Linux (Server |Workstation )?release (\d+)")
            .unwrap(),
        amzn_2: Regex::new(r"Amazon Linux release 2\b").unwrap(),
        amzn_ami: Regex::new(r"Amazon Linux AMI release (\d+\.\d+)").unwrap(),
    })
}

fn match_release(contents: &str, options: &DetectorOptions) -> Option<Namespace> {
    let patterns = patterns();
    let rpm = |name: String| Some(Namespace::new(name, "rpm"));

    if let Some(captures) = patterns.oracle.captures(contents) {
        return rpm(format!("oracle:{}", &captures[2]));
    }
    if let Some(captures) = patterns.centos.captures(contents) {
        return rpm(format!("centos:{}", &captures[2]));
    }
    if let Some(captures) = patterns.rhel.captures(contents) {
        let major = &captures[2];
        if options.uncertified_rhel {
            return rpm(format!("centos:{major}"));
        }
        return rpm(format!("rhel:{major}"));
    }
    if patterns.amzn_2.is_match(contents) {
        return rpm("amzn:2".to_string());
    }
    if let Some(captures) = patterns.amzn_ami.captures(contents) {
        return rpm(format!("amzn:{}", &captures[1]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::super::testutil::layer_with_files;
    use super::*;

    fn detect_in(path: &str, contents: &str, uncertified: bool) -> Option<Namespace> {
        let files = layer_with_files(&[(path, contents)]);
        RedhatReleaseDetector.detect(
            &files,
            &DetectorOptions {
                uncertified_rhel: uncertified,
            },
        )
    }

    #[test]
    fn amazon_variants() {
        let ns = detect_in("etc/system-release", "Amazon Linux release 2 (Karoo)", false).unwrap();
        assert_eq!(ns.name, "amzn:2");
        let ns =
            detect_in("etc/system-release", "Amazon Linux AMI release 2018.03", false).unwrap();
        assert_eq!(ns.name, "amzn:2018.03");
    }

    #[test]
    fn oracle_major_only() {
        let ns = detect_in("etc/oracle-release", "Oracle Linux Server release 6.8", false).unwrap();
        assert_eq!(ns.name, "oracle:6");
        let ns = detect_in("etc/oracle-release", "Oracle Linux Server release 7.2", false).unwrap();
        assert_eq!(ns.name, "oracle:7");
    }

    #[test]
    fn centos_variants() {
        let ns = detect_in("etc/centos-release", "CentOS release 6.6 (Final)", false).unwrap();
        assert_eq!(ns.name, "centos:6");
        let ns = detect_in("etc/redhat-release", "CentOS Linux release 8.3.2011", false).unwrap();
        assert_eq!(ns.name, "centos:8");
        let ns = detect_in(
            "etc/system-release",
            "CentOS Linux release 7.1.1503 (Core)",
            false,
        )
        .unwrap();
        assert_eq!(ns.name, "centos:7");
    }

    #[test]
    fn rhel_certified_and_uncertified() {
        let ns = detect_in(
            "etc/redhat-release",
            "Red Hat Enterprise Linux Server release 7.2 (Maipo)",
            false,
        )
        .unwrap();
        assert_eq!(ns.name, "rhel:7");
        let ns = detect_in(
            "etc/redhat-release",
            "Red Hat Enterprise Linux release 8.0 (Ootpa)",
            false,
        )
        .unwrap();
        assert_eq!(ns.name, "rhel:8");
        let ns = detect_in(
            "etc/redhat-release",
            "Red Hat Enterprise Linux release 8.0 (Ootpa)",
            true,
        )
        .unwrap();
        assert_eq!(ns.name, "centos:8");
        assert_eq!(ns.version_format, "rpm");
    }

    #[test]
    fn empty_layer_detects_nothing() {
        let files = layer_with_files(&[]);
        assert!(RedhatReleaseDetector
            .detect(&files, &DetectorOptions::default())
            .is_none());
    }
}
