//! Certified Red Hat scan records.
//!
//! The certified path runs parallel to the generic feature pipeline: packages
//! carry module and architecture, and each layer is paired with the CPEs of
//! the repositories it was built from so advisories can be narrowed by CPE
//! before any version comparison happens.

use serde::{Deserialize, Serialize};

use crate::model::{DependencyMap, Severity};

/// An installed RPM package as reported by the certified pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhelV2Package {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub executable_to_dependencies: DependencyMap,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub library_to_dependencies: DependencyMap,
}

impl RhelV2Package {
    /// `name-version` label used in logs and dedup keys.
    pub fn label(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// A layer analyzed by the certified pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RhelV2Layer {
    pub hash: String,
    pub dist: String,
    pub packages: Vec<RhelV2Package>,
    pub cpes: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_hash: String,
}

/// How an advisory's `arch` field is matched against an installed package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchOperation {
    #[default]
    Equals,
    /// `arch` is a glob where `*` matches any run of characters.
    Pattern,
}

/// One fixable package inside an advisory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RhelV2FixedIn {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    pub fixed_in_version: String,
    #[serde(default)]
    pub arch_operation: ArchOperation,
}

/// A certified advisory, scoped by the CPEs of the repositories it applies to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RhelV2Vulnerability {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(default)]
    pub severity: Severity,
    pub cpes: Vec<String>,
    pub packages: Vec<RhelV2FixedIn>,
}

impl RhelV2FixedIn {
    /// Whether this record's architecture constraint accepts `arch`.
    pub fn arch_matches(&self, arch: &str) -> bool {
        if self.arch.is_empty() {
            return true;
        }
        match self.arch_operation {
            ArchOperation::Equals => self.arch == arch,
            ArchOperation::Pattern => glob_matches(&self.arch, arch),
        }
    }
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            // Leading literal is anchored at the start.
            match rest.strip_prefix(segment) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            // Trailing literal is anchored at the end.
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(idx) => rest = &rest[idx + segment.len()..],
                None => return false,
            }
        }
    }
    true
}
