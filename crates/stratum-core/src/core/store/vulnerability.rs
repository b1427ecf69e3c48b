//! Vulnerability rows and fixed-in ranges.

use anyhow::Context;
use rusqlite::{params, Connection};
use stratum_domain::{versionfmt, Feature, FeatureVersion, Namespace, Severity, Vulnerability};

use crate::core::errors::{Result, ScanError};

use super::{layer::upsert_namespace, Store};

impl Store {
    /// Upserts a batch of vulnerabilities in one transaction.
    ///
    /// Fixed-in versions are validated against the namespace's version
    /// format up front so a bad record aborts the whole batch instead of
    /// poisoning correlation later.
    pub fn insert_vulnerabilities(&self, vulnerabilities: &[Vulnerability]) -> Result<usize> {
        for vulnerability in vulnerabilities {
            validate(vulnerability)?;
        }
        self.with_immediate_tx(|tx| {
            for vulnerability in vulnerabilities {
                let namespace_id = upsert_namespace(tx, &vulnerability.namespace)?;
                let metadata = match &vulnerability.metadata {
                    Some(metadata) => {
                        Some(serde_json::to_string(metadata).context("encoding metadata")?)
                    }
                    None => None,
                };
                tx.execute(
                    "INSERT INTO vulnerabilities(namespace_id, name, description, link, severity, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(namespace_id, name) DO UPDATE SET
                         description = ?3, link = ?4, severity = ?5, metadata = ?6",
                    params![
                        namespace_id,
                        vulnerability.name,
                        vulnerability.description,
                        vulnerability.link,
                        vulnerability.severity.as_str(),
                        metadata
                    ],
                )
                .context("upserting vulnerability")?;
                let vulnerability_id: i64 = tx
                    .query_row(
                        "SELECT id FROM vulnerabilities WHERE namespace_id = ?1 AND name = ?2",
                        params![namespace_id, vulnerability.name],
                        |row| row.get(0),
                    )
                    .context("querying vulnerability id")?;

                tx.execute(
                    "DELETE FROM vulnerability_fixed_in WHERE vulnerability_id = ?1",
                    params![vulnerability_id],
                )
                .context("clearing fixed-in rows")?;
                for fixed in &vulnerability.fixed_in {
                    tx.execute(
                        "INSERT OR REPLACE INTO vulnerability_fixed_in(vulnerability_id, feature_name, version)
                         VALUES (?1, ?2, ?3)",
                        params![vulnerability_id, fixed.feature.name, fixed.version],
                    )
                    .context("inserting fixed-in row")?;
                }
            }
            Ok(vulnerabilities.len())
        })
    }

    /// Deletes vulnerabilities named by `(namespace, name)` tombstones.
    pub fn delete_vulnerabilities(&self, tombstones: &[(String, String)]) -> Result<usize> {
        self.with_immediate_tx(|tx| {
            let mut deleted = 0;
            for (namespace, name) in tombstones {
                deleted += tx
                    .execute(
                        "DELETE FROM vulnerabilities WHERE name = ?1 AND namespace_id IN
                         (SELECT id FROM namespaces WHERE name = ?2)",
                        params![name, namespace],
                    )
                    .context("deleting vulnerability")?;
            }
            Ok(deleted)
        })
    }

    /// All vulnerabilities of one namespace, fixed-in ranges included.
    pub fn vulnerabilities_for_namespace(&self, namespace: &str) -> Result<Vec<Vulnerability>> {
        let conn = self.connection()?;
        self.vulnerabilities_for_namespace_conn(&conn, namespace)
    }

    pub(super) fn vulnerabilities_for_namespace_conn(
        &self,
        conn: &Connection,
        namespace: &str,
    ) -> Result<Vec<Vulnerability>> {
        let mut statement = conn
            .prepare(
                "SELECT v.id, v.name, v.description, v.link, v.severity, v.metadata,
                        n.name, n.version_format
                 FROM vulnerabilities v JOIN namespaces n ON n.id = v.namespace_id
                 WHERE n.name = ?1
                 ORDER BY v.name",
            )
            .context("preparing vulnerability query")?;
        let rows = statement
            .query_map(params![namespace], |row| {
                let id: i64 = row.get(0)?;
                let name: String = row.get(1)?;
                let description: String = row.get(2)?;
                let link: String = row.get(3)?;
                let severity: String = row.get(4)?;
                let metadata: Option<String> = row.get(5)?;
                let namespace_name: String = row.get(6)?;
                let version_format: String = row.get(7)?;
                Ok((
                    id,
                    name,
                    description,
                    link,
                    severity,
                    metadata,
                    namespace_name,
                    version_format,
                ))
            })
            .context("querying vulnerabilities")?;

        let mut vulnerabilities = Vec::new();
        for mapped in rows {
            let (id, name, description, link, severity, metadata, namespace_name, version_format) =
                mapped.context("reading vulnerability row")?;
            let namespace = Namespace::new(namespace_name, version_format);
            let fixed_in = self.fixed_in_rows(conn, id, &namespace)?;
            vulnerabilities.push(Vulnerability {
                name,
                namespace,
                description,
                link,
                severity: severity.parse().unwrap_or(Severity::Unknown),
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                fixed_in,
                fixed_by: String::new(),
            });
        }
        Ok(vulnerabilities)
    }

    fn fixed_in_rows(
        &self,
        conn: &Connection,
        vulnerability_id: i64,
        namespace: &Namespace,
    ) -> Result<Vec<FeatureVersion>> {
        let mut statement = conn
            .prepare(
                "SELECT feature_name, version FROM vulnerability_fixed_in
                 WHERE vulnerability_id = ?1 ORDER BY feature_name",
            )
            .context("preparing fixed-in query")?;
        let rows = statement
            .query_map(params![vulnerability_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("querying fixed-in rows")?;

        let mut fixed_in = Vec::new();
        for mapped in rows {
            let (feature_name, version) = mapped.context("reading fixed-in row")?;
            fixed_in.push(FeatureVersion::new(
                Feature::new(namespace.clone(), feature_name),
                version,
            ));
        }
        Ok(fixed_in)
    }
}

fn validate(vulnerability: &Vulnerability) -> Result<()> {
    if vulnerability.name.is_empty() {
        return Err(ScanError::bad_request("vulnerability name is required"));
    }
    if vulnerability.namespace.name.is_empty() {
        return Err(ScanError::bad_request(format!(
            "vulnerability {} has no namespace",
            vulnerability.name
        )));
    }
    for fixed in &vulnerability.fixed_in {
        if !versionfmt::valid(&vulnerability.namespace.version_format, &fixed.version) {
            return Err(ScanError::bad_request(format!(
                "vulnerability {} has invalid fixed-in version {:?}",
                vulnerability.name, fixed.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testutil::temp_store;
    use super::*;
    use stratum_domain::MAX_VERSION;

    fn sample(name: &str, fixed: &str) -> Vulnerability {
        let namespace = Namespace::new("debian:10", "dpkg");
        Vulnerability {
            name: name.to_string(),
            namespace: namespace.clone(),
            description: "test".to_string(),
            severity: Severity::Medium,
            fixed_in: vec![FeatureVersion::new(
                Feature::new(namespace, "openssl"),
                fixed,
            )],
            ..Vulnerability::default()
        }
    }

    #[test]
    fn upsert_replaces_fixed_in() {
        let (_dir, store) = temp_store();
        store.insert_vulnerabilities(&[sample("CVE-1", "1.0")]).unwrap();
        store.insert_vulnerabilities(&[sample("CVE-1", "2.0")]).unwrap();

        let loaded = store.vulnerabilities_for_namespace("debian:10").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].fixed_in.len(), 1);
        assert_eq!(loaded[0].fixed_in[0].version, "2.0");
    }

    #[test]
    fn sentinel_fix_versions_are_accepted() {
        let (_dir, store) = temp_store();
        store
            .insert_vulnerabilities(&[sample("CVE-UNFIXED", MAX_VERSION)])
            .unwrap();
        let loaded = store.vulnerabilities_for_namespace("debian:10").unwrap();
        assert_eq!(loaded[0].fixed_in[0].version, MAX_VERSION);
    }

    #[test]
    fn invalid_fixed_in_version_rejects_batch() {
        let (_dir, store) = temp_store();
        let err = store
            .insert_vulnerabilities(&[sample("CVE-BAD", "not a version")])
            .unwrap_err();
        assert!(matches!(err, ScanError::BadRequest(_)));
        assert!(store
            .vulnerabilities_for_namespace("debian:10")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn tombstones_delete_by_namespace_and_name() {
        let (_dir, store) = temp_store();
        store
            .insert_vulnerabilities(&[sample("CVE-1", "1.0"), sample("CVE-2", "1.0")])
            .unwrap();
        let deleted = store
            .delete_vulnerabilities(&[("debian:10".to_string(), "CVE-1".to_string())])
            .unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.vulnerabilities_for_namespace("debian:10").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "CVE-2");
    }
}
