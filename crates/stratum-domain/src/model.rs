//! Core scan records: namespaces, features, layers and vulnerabilities.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maps an executable or library path to the shared-object names it links against.
///
/// Ordered containers keep serialized output stable across runs.
pub type DependencyMap = BTreeMap<String, BTreeSet<String>>;

/// A distribution scope for packages and vulnerabilities, e.g. `debian:10`.
///
/// Two namespaces with different names share no vulnerabilities. The
/// `version_format` names the comparison discipline registered in
/// [`crate::versionfmt`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub version_format: String,
}

impl Namespace {
    pub fn new(name: impl Into<String>, version_format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_format: version_format.into(),
        }
    }

    /// Distribution part of the name (`debian` out of `debian:10`).
    pub fn distro(&self) -> &str {
        self.name.split(':').next().unwrap_or(&self.name)
    }

    pub fn is_rhel(&self) -> bool {
        self.distro() == "rhel"
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A package identity within a namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    pub namespace: Namespace,
    pub name: String,
}

impl Feature {
    pub fn new(namespace: Namespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

/// An installed package at a concrete version.
///
/// Equality and hashing cover `(feature, version)` only: the dependency maps
/// and correlation results are attributes of the installation, not part of
/// its identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeatureVersion {
    pub feature: Feature,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub executable_to_dependencies: DependencyMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub library_to_dependencies: DependencyMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_by: Vec<Vulnerability>,
}

impl FeatureVersion {
    pub fn new(feature: Feature, version: impl Into<String>) -> Self {
        Self {
            feature,
            version: version.into(),
            ..Self::default()
        }
    }

    /// Identity key used for dedup during scan assembly.
    pub fn key(&self) -> String {
        format!("{}:{}", self.feature.name, self.version)
    }
}

impl PartialEq for FeatureVersion {
    fn eq(&self, other: &Self) -> bool {
        self.feature == other.feature && self.version == other.version
    }
}

impl Eq for FeatureVersion {}

impl Hash for FeatureVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.feature.hash(state);
        self.version.hash(state);
    }
}

/// One filesystem delta of a container image.
///
/// Layers form forests: `parent` is the in-memory parent record when the
/// caller loaded it, while the ledger persists only the parent key. The
/// `features` carried here are the ones observable at this layer after
/// parent diffing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub engine_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Layer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default)]
    pub distroless: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<FeatureVersion>,
}

impl Layer {
    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_deref().map(|p| p.name.as_str())
    }
}

/// Vulnerability severity, ordered from least to most severe.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    #[default]
    Unknown,
    Negligible,
    Low,
    Medium,
    High,
    Critical,
    Defcon1,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Negligible => "Negligible",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
            Self::Defcon1 => "Defcon1",
        }
    }
}

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Unknown" => Ok(Self::Unknown),
            "Negligible" => Ok(Self::Negligible),
            "Low" => Ok(Self::Low),
            "Medium" => Ok(Self::Medium),
            "High" => Ok(Self::High),
            "Critical" => Ok(Self::Critical),
            "Defcon1" => Ok(Self::Defcon1),
            other => Err(UnknownSeverity(other.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown severity {0:?}")]
pub struct UnknownSeverity(pub String);

/// A known vulnerability scoped to one namespace.
///
/// `fixed_in` lists, per affected feature, the version that fixes this
/// vulnerability. An entry at [`crate::versionfmt::MAX_VERSION`] means the
/// feature is affected with no known fix. `fixed_by` is only populated on
/// correlation results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub name: String,
    pub namespace: Namespace,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_in: Vec<FeatureVersion>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fixed_by: String,
}
