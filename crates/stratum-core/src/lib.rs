#![deny(clippy::all, warnings)]

mod core;

pub mod api;

pub use crate::core::analyzer;
pub use crate::core::elf::{self, ElfMetadata};
pub use crate::core::env::{EnvSnapshot, ScanConfig};
pub use crate::core::errors::ScanError;
pub use crate::core::featurefmt;
pub use crate::core::featurens;
pub use crate::core::layerfiles::extract::{extract_layer_files, ExtractOptions};
pub use crate::core::layerfiles::{FileData, LayerFiles};
pub use crate::core::matcher;
pub use crate::core::nvdcache::{MetadataCache, MetadataEnricher, NvdRecord};
pub use crate::core::rhelv2;
pub use crate::core::store::{
    LayerComponents, Store, StoreOptions, VULN_UPDATE_TIMESTAMP_KEY,
};
pub use crate::core::updater::sources::{fetch_all_sources, DirectorySource, VulnSource};
pub use crate::core::updater::{run_once, Updater, UpdaterConfig};
pub use crate::core::vulndump::{self, DumpManifest, OsVulns, Tombstone};
pub use crate::core::worker::{self, CancelToken, LayerRequest, ENGINE_VERSION};
