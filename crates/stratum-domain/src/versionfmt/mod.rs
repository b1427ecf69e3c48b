//! Version-comparison disciplines, addressed by name.
//!
//! Each namespace carries the name of the discipline its packages use
//! (`dpkg`, `rpm`, `apk`). Callers go through [`compare`] and [`valid`];
//! the sentinels [`MIN_VERSION`] and [`MAX_VERSION`] compare below/above
//! every concrete version in every discipline, so "affected with no known
//! fix" can be expressed as a fix at `MAX_VERSION`.

use std::cmp::Ordering;

pub mod apk;
pub mod dpkg;
pub mod rpm;

/// Sentinel below every concrete version.
pub const MIN_VERSION: &str = "#MINV#";
/// Sentinel above every concrete version; marks "no known fix".
pub const MAX_VERSION: &str = "#MAXV#";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("unknown version format {0:?}")]
    UnknownFormat(String),
    #[error("invalid version string {0:?}")]
    InvalidVersion(String),
}

/// A total order over the version strings of one packaging ecosystem.
pub trait VersionFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `version` is well-formed for this discipline. Sentinels are
    /// always valid.
    fn valid(&self, version: &str) -> bool;

    /// Compares two concrete versions. Sentinel handling happens in
    /// [`compare`] before delegation.
    fn compare_concrete(&self, a: &str, b: &str) -> Result<Ordering, VersionError>;
}

static FORMATS: &[&dyn VersionFormat] = &[&dpkg::DpkgFormat, &rpm::RpmFormat, &apk::ApkFormat];

/// Resolves a discipline by its registered name.
pub fn get(name: &str) -> Result<&'static dyn VersionFormat, VersionError> {
    FORMATS
        .iter()
        .find(|f| f.name() == name)
        .copied()
        .ok_or_else(|| VersionError::UnknownFormat(name.to_string()))
}

/// Compares `a` and `b` under the named discipline, with sentinel handling.
pub fn compare(format: &str, a: &str, b: &str) -> Result<Ordering, VersionError> {
    if let Some(ordering) = sentinel_compare(a, b) {
        return Ok(ordering);
    }
    get(format)?.compare_concrete(a, b)
}

/// Whether `version` is well-formed for the named discipline.
pub fn valid(format: &str, version: &str) -> bool {
    if version == MIN_VERSION || version == MAX_VERSION {
        return true;
    }
    get(format).map(|f| f.valid(version)).unwrap_or(false)
}

fn sentinel_compare(a: &str, b: &str) -> Option<Ordering> {
    let rank = |v: &str| match v {
        MIN_VERSION => Some(-1),
        MAX_VERSION => Some(1),
        _ => None,
    };
    match (rank(a), rank(b)) {
        (None, None) => None,
        (ra, rb) => Some(ra.unwrap_or(0).cmp(&rb.unwrap_or(0))),
    }
}
