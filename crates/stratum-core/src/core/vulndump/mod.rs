//! Vulnerability dump format: a zip with a manifest, OS vulnerabilities,
//! NVD metadata and optional certified advisories.
//!
//! Application order is fixed — OS vulnerabilities, NVD metadata, CPE cache
//! — and the ledger's update-timestamp key is written last, making it the
//! commit point: a failure anywhere earlier leaves the key untouched and the
//! next cycle retries.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};
use zip::{write::FileOptions, ZipArchive, ZipWriter};

use crate::core::nvdcache::{MetadataCache, NvdRecord};
use crate::core::store::{Store, VULN_UPDATE_TIMESTAMP_KEY};
use stratum_domain::{RhelV2Vulnerability, Vulnerability};

pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const OS_VULNS_FILENAME: &str = "os_vulns.json";
pub const NVD_DIRNAME: &str = "nvd";
pub const RHELV2_FILENAME: &str = "rhelv2/advisories.json";

/// How far `since` may precede the ledger's last applied `until` before the
/// diff is considered non-contiguous.
const CONTIGUITY_TOLERANCE: Duration = Duration::hours(1);

/// Time bounds of a dump.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DumpManifest {
    pub since: String,
    pub until: String,
}

impl DumpManifest {
    /// A full dump: since the epoch, until `until`.
    pub fn full(until: OffsetDateTime) -> Result<Self> {
        Ok(Self {
            since: OffsetDateTime::UNIX_EPOCH
                .format(&Rfc3339)
                .context("formatting epoch")?,
            until: until.format(&Rfc3339).context("formatting until")?,
        })
    }

    pub fn since_time(&self) -> Result<OffsetDateTime> {
        OffsetDateTime::parse(&self.since, &Rfc3339)
            .with_context(|| format!("invalid manifest since {:?}", self.since))
    }

    pub fn until_time(&self) -> Result<OffsetDateTime> {
        OffsetDateTime::parse(&self.until, &Rfc3339)
            .with_context(|| format!("invalid manifest until {:?}", self.until))
    }
}

/// OS vulnerability payload: upserts plus explicit tombstones.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OsVulns {
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub deleted: Vec<Tombstone>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tombstone {
    pub namespace: String,
    pub name: String,
}

/// Everything read out of a dump archive.
#[derive(Debug, Default)]
pub struct LoadedDump {
    pub manifest: Option<DumpManifest>,
    pub os_vulns: OsVulns,
    pub nvd_records: Vec<NvdRecord>,
    pub rhelv2: Vec<RhelV2Vulnerability>,
}

/// Reads and parses a dump archive from disk.
pub fn load_dump(path: &Path) -> Result<LoadedDump> {
    let file =
        File::open(path).with_context(|| format!("opening dump {}", path.display()))?;
    let mut archive = ZipArchive::new(file).context("reading dump archive")?;

    let mut dump = LoadedDump::default();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).context("reading dump entry")?;
        let name = entry.name().to_string();
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .with_context(|| format!("reading dump entry {name}"))?;

        if name == MANIFEST_FILENAME {
            dump.manifest =
                Some(serde_json::from_slice(&contents).context("parsing manifest.json")?);
        } else if name == OS_VULNS_FILENAME {
            dump.os_vulns =
                serde_json::from_slice(&contents).context("parsing os_vulns.json")?;
        } else if name.starts_with(NVD_DIRNAME) && name.ends_with(".json") {
            let records: Vec<NvdRecord> = serde_json::from_slice(&contents)
                .with_context(|| format!("parsing NVD file {name}"))?;
            dump.nvd_records.extend(records);
        } else if name == RHELV2_FILENAME {
            dump.rhelv2 =
                serde_json::from_slice(&contents).context("parsing rhelv2 advisories")?;
        }
    }
    Ok(dump)
}

/// Validates a dump's manifest against the ledger's last applied `until`.
pub fn validate_manifest(manifest: &DumpManifest, store: &Store) -> Result<()> {
    let since = manifest.since_time()?;
    let until = manifest.until_time()?;
    if until <= since {
        bail!("manifest until {} is not after since {}", manifest.until, manifest.since);
    }

    let last_applied = store
        .get_key_value(VULN_UPDATE_TIMESTAMP_KEY)
        .map_err(|err| anyhow!(err))?;
    match last_applied {
        None => {
            // An empty ledger accepts full dumps only.
            if since != OffsetDateTime::UNIX_EPOCH {
                bail!("ledger is empty; a full dump is required, got since {}", manifest.since);
            }
        }
        Some(value) => {
            let applied_until = OffsetDateTime::parse(value.trim(), &Rfc3339)
                .with_context(|| format!("invalid timestamp in ledger: {value:?}"))?;
            // A diff must pick up (within tolerance) where the applied state
            // ends; anything older needs a full dump instead.
            if since != OffsetDateTime::UNIX_EPOCH && since < applied_until - CONTIGUITY_TOLERANCE
            {
                bail!(
                    "diff dump since {} does not cover applied state {}; a full dump is required",
                    manifest.since,
                    value.trim()
                );
            }
            if until <= applied_until {
                debug!(until = %manifest.until, "dump is not newer than applied state");
            }
        }
    }
    Ok(())
}

/// Applies a loaded dump: OS vulnerabilities, NVD metadata, certified
/// advisories, then the timestamp key as the commit point.
pub fn apply_dump(dump: &LoadedDump, store: &Store, cache: &MetadataCache) -> Result<()> {
    let manifest = dump
        .manifest
        .as_ref()
        .ok_or_else(|| anyhow!("dump carries no manifest"))?;
    validate_manifest(manifest, store)?;

    let mut inserted = 0;
    for batch in dump.os_vulns.vulnerabilities.chunks(500) {
        inserted += store
            .insert_vulnerabilities(batch)
            .map_err(|err| anyhow!(err))?;
    }
    if !dump.os_vulns.deleted.is_empty() {
        let tombstones: Vec<(String, String)> = dump
            .os_vulns
            .deleted
            .iter()
            .map(|t| (t.namespace.clone(), t.name.clone()))
            .collect();
        store
            .delete_vulnerabilities(&tombstones)
            .map_err(|err| anyhow!(err))?;
    }

    if !dump.nvd_records.is_empty() {
        cache.replace(dump.nvd_records.clone());
    }
    if !dump.rhelv2.is_empty() {
        store
            .insert_rhelv2_vulnerabilities(&dump.rhelv2)
            .map_err(|err| anyhow!(err))?;
    }

    store
        .update_key_value(VULN_UPDATE_TIMESTAMP_KEY, manifest.until.trim())
        .map_err(|err| anyhow!(err))?;
    info!(
        inserted,
        deleted = dump.os_vulns.deleted.len(),
        nvd = dump.nvd_records.len(),
        until = %manifest.until,
        "applied vulnerability dump"
    );
    Ok(())
}

/// Writes a complete dump archive.
pub fn write_dump(
    out_file: &Path,
    manifest: &DumpManifest,
    os_vulns: &OsVulns,
    nvd_records: &[NvdRecord],
    rhelv2: &[RhelV2Vulnerability],
) -> Result<()> {
    let file = File::create(out_file)
        .with_context(|| format!("creating dump {}", out_file.display()))?;
    let mut writer = ZipWriter::new(file);
    let options: FileOptions = FileOptions::default();

    writer
        .start_file(MANIFEST_FILENAME, options)
        .context("starting manifest entry")?;
    writer
        .write_all(&serde_json::to_vec_pretty(manifest).context("encoding manifest")?)
        .context("writing manifest")?;

    writer
        .start_file(OS_VULNS_FILENAME, options)
        .context("starting os vulns entry")?;
    writer
        .write_all(&serde_json::to_vec(os_vulns).context("encoding os vulns")?)
        .context("writing os vulns")?;

    if !nvd_records.is_empty() {
        writer
            .start_file(format!("{NVD_DIRNAME}/records.json"), options)
            .context("starting nvd entry")?;
        writer
            .write_all(&serde_json::to_vec(nvd_records).context("encoding nvd records")?)
            .context("writing nvd records")?;
    }
    if !rhelv2.is_empty() {
        writer
            .start_file(RHELV2_FILENAME, options)
            .context("starting rhelv2 entry")?;
        writer
            .write_all(&serde_json::to_vec(rhelv2).context("encoding rhelv2 advisories")?)
            .context("writing rhelv2 advisories")?;
    }
    writer.finish().context("finalizing dump archive")?;
    Ok(())
}
