//! In-memory NVD metadata, shared between the updater and scan paths.
//!
//! The cache is an immutable snapshot behind a lock: the updater builds a
//! complete replacement map and swaps it in atomically, so concurrent
//! readers see either the old or the new metadata set, never a mixture.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::json;
use stratum_domain::Vulnerability;

/// Pre-parsed NVD record, as shipped in a dump's `nvd/` files.
///
/// Full feed parsing happens upstream; the scanner only consumes the typed
/// subset it needs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NvdRecord {
    pub cve: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_v2_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_v2_vector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_v3_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_v3_vector: Option<String>,
}

type Snapshot = Arc<HashMap<String, NvdRecord>>;

/// Process-wide metadata cache with single-writer snapshot swaps.
#[derive(Debug, Default)]
pub struct MetadataCache {
    inner: RwLock<Snapshot>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the whole snapshot.
    pub fn replace(&self, records: Vec<NvdRecord>) {
        let map: HashMap<String, NvdRecord> = records
            .into_iter()
            .map(|record| (record.cve.clone(), record))
            .collect();
        let mut guard = self.inner.write().expect("metadata cache poisoned");
        *guard = Arc::new(map);
    }

    /// Read handle valid for the duration of a request.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().expect("metadata cache poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Attaches NVD metadata to a vulnerability when none is present.
    pub fn enrich(&self, vulnerability: &mut Vulnerability) {
        if vulnerability.metadata.is_some() {
            return;
        }
        let snapshot = self.snapshot();
        let Some(record) = snapshot.get(&vulnerability.name) else {
            return;
        };
        vulnerability.metadata = Some(metadata_value(record));
    }
}

/// One-shot enricher for dump generation: built before the loop, dropped
/// after, so the record map does not outlive the run.
pub struct MetadataEnricher {
    records: HashMap<String, NvdRecord>,
}

impl MetadataEnricher {
    pub fn build(records: Vec<NvdRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.cve.clone(), record))
                .collect(),
        }
    }

    pub fn enrich(&self, vulnerability: &mut Vulnerability) {
        if vulnerability.metadata.is_some() {
            return;
        }
        if let Some(record) = self.records.get(&vulnerability.name) {
            vulnerability.metadata = Some(metadata_value(record));
        }
    }

    /// Explicitly purges the record map.
    pub fn purge(self) {}
}

fn metadata_value(record: &NvdRecord) -> serde_json::Value {
    let mut nvd = serde_json::Map::new();
    if let Some(published) = &record.published {
        nvd.insert("PublishedDateTime".to_string(), json!(published));
    }
    if let Some(score) = record.cvss_v2_score {
        nvd.insert(
            "CVSSv2".to_string(),
            json!({"Score": score, "Vectors": record.cvss_v2_vector}),
        );
    }
    if let Some(score) = record.cvss_v3_score {
        nvd.insert(
            "CVSSv3".to_string(),
            json!({"Score": score, "Vectors": record.cvss_v3_vector}),
        );
    }
    json!({ "NVD": nvd })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cve: &str, score: f64) -> NvdRecord {
        NvdRecord {
            cve: cve.to_string(),
            cvss_v3_score: Some(score),
            cvss_v3_vector: Some("CVSS:3.1/AV:N".to_string()),
            ..NvdRecord::default()
        }
    }

    #[test]
    fn replace_swaps_the_whole_snapshot() {
        let cache = MetadataCache::new();
        cache.replace(vec![record("CVE-2024-0001", 9.8)]);
        let before = cache.snapshot();
        cache.replace(vec![record("CVE-2024-0002", 5.0)]);

        // The old handle still sees the old world.
        assert!(before.contains_key("CVE-2024-0001"));
        let after = cache.snapshot();
        assert!(!after.contains_key("CVE-2024-0001"));
        assert!(after.contains_key("CVE-2024-0002"));
    }

    #[test]
    fn enrich_fills_only_missing_metadata() {
        let cache = MetadataCache::new();
        cache.replace(vec![record("CVE-2024-0001", 9.8)]);

        let mut vulnerability = Vulnerability {
            name: "CVE-2024-0001".to_string(),
            ..Vulnerability::default()
        };
        cache.enrich(&mut vulnerability);
        let metadata = vulnerability.metadata.clone().unwrap();
        assert_eq!(metadata["NVD"]["CVSSv3"]["Score"], 9.8);

        // Existing metadata is never overwritten.
        let mut pre_set = Vulnerability {
            name: "CVE-2024-0001".to_string(),
            metadata: Some(json!({"custom": true})),
            ..Vulnerability::default()
        };
        cache.enrich(&mut pre_set);
        assert_eq!(pre_set.metadata.unwrap()["custom"], true);
    }

    #[test]
    fn unknown_cves_stay_bare() {
        let cache = MetadataCache::new();
        let mut vulnerability = Vulnerability {
            name: "CVE-1999-9999".to_string(),
            ..Vulnerability::default()
        };
        cache.enrich(&mut vulnerability);
        assert!(vulnerability.metadata.is_none());
    }
}
