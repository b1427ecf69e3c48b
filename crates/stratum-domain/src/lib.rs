#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod component;
pub mod model;
pub mod releases;
pub mod rhelv2;
pub mod versionfmt;

pub use component::{Component, JavaAttributes, SourceType};
pub use model::{
    DependencyMap, Feature, FeatureVersion, Layer, Namespace, Severity, Vulnerability,
};
pub use rhelv2::{ArchOperation, RhelV2FixedIn, RhelV2Layer, RhelV2Package, RhelV2Vulnerability};
pub use versionfmt::{VersionError, MAX_VERSION, MIN_VERSION};
