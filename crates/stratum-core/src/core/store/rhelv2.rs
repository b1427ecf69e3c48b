//! Certified-path tables: RHELv2 layers and advisories.

use std::collections::HashSet;

use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use stratum_domain::{RhelV2Layer, RhelV2Vulnerability};

use crate::core::errors::{Result, ScanError};

use super::Store;

const MAX_CHAIN_DEPTH: usize = 512;

impl Store {
    /// Upserts a certified layer record, keyed by hash.
    pub fn insert_rhelv2_layer(&self, layer: &RhelV2Layer) -> Result<()> {
        if layer.hash.is_empty() {
            return Err(ScanError::bad_request("rhelv2 layer has no hash"));
        }
        let payload = serde_json::to_string(layer).context("encoding rhelv2 layer")?;
        self.with_immediate_tx(|tx| {
            tx.execute(
                "INSERT INTO rhelv2_layers(hash, parent_hash, dist, payload)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(hash) DO UPDATE SET parent_hash = ?2, dist = ?3, payload = ?4",
                params![layer.hash, layer.parent_hash, layer.dist, payload],
            )
            .context("upserting rhelv2 layer")?;
            Ok(())
        })
    }

    /// The certified layer chain ending at `hash`, root first.
    pub fn get_rhelv2_layer_chain(&self, hash: &str) -> Result<Vec<RhelV2Layer>> {
        let conn = self.connection()?;
        let mut chain: Vec<RhelV2Layer> = Vec::new();
        let mut current = hash.to_string();
        while !current.is_empty() {
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Err(ScanError::Other(anyhow::anyhow!(
                    "rhelv2 ancestry exceeds {MAX_CHAIN_DEPTH} levels"
                )));
            }
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM rhelv2_layers WHERE hash = ?1",
                    params![current],
                    |row| row.get(0),
                )
                .optional()
                .context("querying rhelv2 layer")?;
            let Some(payload) = payload else {
                if chain.is_empty() {
                    return Err(ScanError::NotFound);
                }
                break;
            };
            let layer: RhelV2Layer =
                serde_json::from_str(&payload).context("decoding rhelv2 layer")?;
            current = layer.parent_hash.clone();
            chain.push(layer);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Upserts certified advisories, indexed by their CPEs.
    pub fn insert_rhelv2_vulnerabilities(
        &self,
        advisories: &[RhelV2Vulnerability],
    ) -> Result<usize> {
        self.with_immediate_tx(|tx| {
            for advisory in advisories {
                if advisory.name.is_empty() {
                    return Err(ScanError::bad_request("rhelv2 advisory has no name"));
                }
                let payload = serde_json::to_string(advisory).context("encoding advisory")?;
                tx.execute(
                    "INSERT INTO rhelv2_vulnerabilities(name, payload) VALUES (?1, ?2)
                     ON CONFLICT(name) DO UPDATE SET payload = ?2",
                    params![advisory.name, payload],
                )
                .context("upserting advisory")?;
                let advisory_id: i64 = tx
                    .query_row(
                        "SELECT id FROM rhelv2_vulnerabilities WHERE name = ?1",
                        params![advisory.name],
                        |row| row.get(0),
                    )
                    .context("querying advisory id")?;
                tx.execute(
                    "DELETE FROM rhelv2_vulnerability_cpes WHERE vulnerability_id = ?1",
                    params![advisory_id],
                )
                .context("clearing advisory cpes")?;
                for cpe in &advisory.cpes {
                    tx.execute(
                        "INSERT OR IGNORE INTO rhelv2_vulnerability_cpes(vulnerability_id, cpe)
                         VALUES (?1, ?2)",
                        params![advisory_id, cpe],
                    )
                    .context("inserting advisory cpe")?;
                }
            }
            Ok(advisories.len())
        })
    }

    /// Advisories whose CPE set intersects the layer's CPEs.
    pub fn rhelv2_vulnerabilities_for_cpes(
        &self,
        cpes: &[String],
    ) -> Result<Vec<RhelV2Vulnerability>> {
        if cpes.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connection()?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut advisories = Vec::new();
        let mut statement = conn
            .prepare(
                "SELECT v.name, v.payload FROM rhelv2_vulnerabilities v
                 JOIN rhelv2_vulnerability_cpes c ON c.vulnerability_id = v.id
                 WHERE c.cpe = ?1 ORDER BY v.name",
            )
            .context("preparing advisory query")?;
        for cpe in cpes {
            let rows = statement
                .query_map(params![cpe], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .context("querying advisories")?;
            for mapped in rows {
                let (name, payload) = mapped.context("reading advisory row")?;
                if !seen.insert(name) {
                    continue;
                }
                advisories
                    .push(serde_json::from_str(&payload).context("decoding advisory")?);
            }
        }
        advisories.sort_by(|a: &RhelV2Vulnerability, b: &RhelV2Vulnerability| a.name.cmp(&b.name));
        Ok(advisories)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::temp_store;
    use super::*;
    use stratum_domain::{RhelV2FixedIn, RhelV2Package};

    fn layer(hash: &str, parent: &str) -> RhelV2Layer {
        RhelV2Layer {
            hash: hash.to_string(),
            parent_hash: parent.to_string(),
            dist: "rhel:8".to_string(),
            packages: vec![RhelV2Package {
                name: format!("pkg-{hash}"),
                version: "1-1.el8".to_string(),
                arch: "x86_64".to_string(),
                ..RhelV2Package::default()
            }],
            cpes: vec!["cpe:/o:redhat:enterprise_linux:8".to_string()],
        }
    }

    #[test]
    fn chain_walks_parent_hashes() {
        let (_dir, store) = temp_store();
        store.insert_rhelv2_layer(&layer("base", "")).unwrap();
        store.insert_rhelv2_layer(&layer("top", "base")).unwrap();

        let chain = store.get_rhelv2_layer_chain("top").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].hash, "base");
        assert_eq!(chain[1].hash, "top");
    }

    #[test]
    fn missing_layer_is_not_found() {
        let (_dir, store) = temp_store();
        assert!(matches!(
            store.get_rhelv2_layer_chain("missing"),
            Err(ScanError::NotFound)
        ));
    }

    #[test]
    fn advisories_filter_by_cpe_intersection() {
        let (_dir, store) = temp_store();
        let advisory = RhelV2Vulnerability {
            name: "RHSA-2024:1111".to_string(),
            cpes: vec!["cpe:/o:redhat:enterprise_linux:8::baseos".to_string()],
            packages: vec![RhelV2FixedIn {
                name: "openssl".to_string(),
                fixed_in_version: "1:1.1.1k-7.el8".to_string(),
                ..RhelV2FixedIn::default()
            }],
            ..RhelV2Vulnerability::default()
        };
        store.insert_rhelv2_vulnerabilities(&[advisory]).unwrap();

        let hits = store
            .rhelv2_vulnerabilities_for_cpes(&[
                "cpe:/o:redhat:enterprise_linux:8::baseos".to_string()
            ])
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = store
            .rhelv2_vulnerabilities_for_cpes(&["cpe:/a:redhat:other:9".to_string()])
            .unwrap();
        assert!(misses.is_empty());
    }
}
