//! Vulnerability correlation.
//!
//! A vulnerability affects an installed feature version when the namespaces
//! match and the installed version sorts strictly below some fixed-in entry
//! for that feature under the namespace's version format. The reported
//! `fixed_by` is the lowest fix version that still satisfies the predicate;
//! a fix at the max-version sentinel means "affected, no fix available".

use std::cmp::Ordering;

use stratum_domain::{
    versionfmt, FeatureVersion, RhelV2FixedIn, RhelV2Package, RhelV2Vulnerability, Vulnerability,
    MAX_VERSION,
};
use tracing::warn;

/// Returns the vulnerabilities affecting `feature`, with `fixed_by` set.
///
/// Candidates must already be scoped to the feature's namespace; entries in
/// other namespaces are skipped. The result is ordered by vulnerability name
/// so repeated correlations are stable.
pub fn affecting(feature: &FeatureVersion, candidates: &[Vulnerability]) -> Vec<Vulnerability> {
    let mut affecting = Vec::new();
    for vulnerability in candidates {
        if vulnerability.namespace != feature.feature.namespace {
            continue;
        }
        let Some(fixed_by) = lowest_applicable_fix(feature, &vulnerability.fixed_in) else {
            continue;
        };
        let mut reported = vulnerability.clone();
        reported.fixed_in = Vec::new();
        reported.fixed_by = if fixed_by == MAX_VERSION {
            String::new()
        } else {
            fixed_by
        };
        affecting.push(reported);
    }
    affecting.sort_by(|a, b| a.name.cmp(&b.name));
    affecting
}

/// Lowest fix version strictly above the installed version, if any.
fn lowest_applicable_fix(feature: &FeatureVersion, fixed_in: &[FeatureVersion]) -> Option<String> {
    let format = &feature.feature.namespace.version_format;
    let mut lowest: Option<String> = None;
    for fix in fixed_in {
        if fix.feature.name != feature.feature.name {
            continue;
        }
        match versionfmt::compare(format, &feature.version, &fix.version) {
            Ok(Ordering::Less) => {}
            Ok(_) => continue,
            Err(err) => {
                warn!(%err, feature = %feature.feature.name, "skipping uncomparable fix version");
                continue;
            }
        }
        lowest = match lowest {
            None => Some(fix.version.clone()),
            Some(current) => {
                let keep_new = versionfmt::compare(format, &fix.version, &current)
                    .map(|ordering| ordering == Ordering::Less)
                    .unwrap_or(false);
                if keep_new {
                    Some(fix.version.clone())
                } else {
                    Some(current)
                }
            }
        };
    }
    lowest
}

/// Certified-path correlation: advisories were pre-filtered by CPE; here the
/// `(module, name, arch)` triple must line up before versions are compared.
pub fn rhelv2_affecting(
    package: &RhelV2Package,
    advisories: &[RhelV2Vulnerability],
) -> Vec<(RhelV2Vulnerability, String)> {
    let mut affecting = Vec::new();
    for advisory in advisories {
        let Some(fixed) = advisory
            .packages
            .iter()
            .find(|record| rhelv2_record_applies(package, record))
        else {
            continue;
        };
        affecting.push((advisory.clone(), fixed.fixed_in_version.clone()));
    }
    affecting.sort_by(|a, b| a.0.name.cmp(&b.0.name));
    affecting
}

fn rhelv2_record_applies(package: &RhelV2Package, record: &RhelV2FixedIn) -> bool {
    if record.name != package.name || record.module != package.module {
        return false;
    }
    if !record.arch_matches(&package.arch) {
        return false;
    }
    match versionfmt::compare("rpm", &package.version, &record.fixed_in_version) {
        Ok(Ordering::Less) => true,
        Ok(_) => false,
        Err(err) => {
            warn!(%err, package = %package.name, "skipping uncomparable advisory version");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_domain::{Feature, Namespace, Severity};

    fn namespace() -> Namespace {
        Namespace::new("debian:7", "dpkg")
    }

    fn installed(name: &str, version: &str) -> FeatureVersion {
        FeatureVersion::new(Feature::new(namespace(), name), version)
    }

    fn vuln(name: &str, feature: &str, fixed: &str) -> Vulnerability {
        Vulnerability {
            name: name.to_string(),
            namespace: namespace(),
            severity: Severity::High,
            fixed_in: vec![FeatureVersion::new(
                Feature::new(namespace(), feature),
                fixed,
            )],
            ..Vulnerability::default()
        }
    }

    #[test]
    fn reports_strictly_lower_versions_only() {
        let feature = installed("openssl", "1.0");
        let candidates = vec![
            vuln("CVE-FIXED-LATER", "openssl", "2.0"),
            vuln("CVE-ALREADY-FIXED", "openssl", "1.0"),
            vuln("CVE-OTHER-PACKAGE", "nginx", "9.9"),
        ];
        let affecting = affecting(&feature, &candidates);
        assert_eq!(affecting.len(), 1);
        assert_eq!(affecting[0].name, "CVE-FIXED-LATER");
        assert_eq!(affecting[0].fixed_by, "2.0");
    }

    #[test]
    fn lowest_satisfying_fix_wins() {
        let feature = installed("openssl", "1.0");
        let mut vulnerability = vuln("CVE-MANY-FIXES", "openssl", "3.0");
        vulnerability.fixed_in.push(FeatureVersion::new(
            Feature::new(namespace(), "openssl"),
            "1.5",
        ));
        let affecting = affecting(&feature, &[vulnerability]);
        assert_eq!(affecting[0].fixed_by, "1.5");
    }

    #[test]
    fn unfixed_sentinel_reports_empty_fixed_by() {
        let feature = installed("openssl", "1.0");
        let affecting = affecting(&feature, &[vuln("CVE-NO-FIX", "openssl", MAX_VERSION)]);
        assert_eq!(affecting.len(), 1);
        assert_eq!(affecting[0].fixed_by, "");
    }

    #[test]
    fn namespace_mismatch_never_matches() {
        let mut feature = installed("openssl", "1.0");
        feature.feature.namespace = Namespace::new("debian:8", "dpkg");
        assert!(affecting(&feature, &[vuln("CVE-WRONG-NS", "openssl", "2.0")]).is_empty());
    }

    #[test]
    fn results_are_ordered_by_name() {
        let feature = installed("openssl", "1.0");
        let affecting = affecting(
            &feature,
            &[
                vuln("CVE-B", "openssl", "2.0"),
                vuln("CVE-A", "openssl", "3.0"),
            ],
        );
        let names: Vec<&str> = affecting.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["CVE-A", "CVE-B"]);
    }

    #[test]
    fn rhelv2_requires_matching_module_and_arch() {
        let package = RhelV2Package {
            name: "nodejs".to_string(),
            version: "1:10.0.0-1.el8".to_string(),
            module: "nodejs:10".to_string(),
            arch: "x86_64".to_string(),
            ..RhelV2Package::default()
        };
        let advisory = RhelV2Vulnerability {
            name: "RHSA-2024:0001".to_string(),
            cpes: vec!["cpe:/o:redhat:enterprise_linux:8".to_string()],
            packages: vec![RhelV2FixedIn {
                name: "nodejs".to_string(),
                module: "nodejs:10".to_string(),
                arch: "x86_64".to_string(),
                fixed_in_version: "1:10.24.0-1.el8".to_string(),
                ..RhelV2FixedIn::default()
            }],
            ..RhelV2Vulnerability::default()
        };
        assert_eq!(rhelv2_affecting(&package, &[advisory.clone()]).len(), 1);

        let wrong_module = RhelV2Package {
            module: "nodejs:12".to_string(),
            ..package
        };
        assert!(rhelv2_affecting(&wrong_module, &[advisory]).is_empty());
    }
}
