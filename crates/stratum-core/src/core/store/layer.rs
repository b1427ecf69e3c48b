//! Layer rows: insert with parent diffing, point-in-time reconstruction.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use stratum_domain::{DependencyMap, Feature, FeatureVersion, Layer, Namespace, Vulnerability};
use tracing::warn;

use crate::core::errors::{Result, ScanError};
use crate::core::matcher;

use super::{Store, StoreOptions};

/// Upper bound on ancestor-chain walks; cycles cannot occur through the
/// parent foreign key, this guards against pathological depth.
const MAX_CHAIN_DEPTH: usize = 512;

#[derive(Debug, Clone)]
pub(super) struct LayerRow {
    pub(super) id: i64,
    pub(super) name: String,
    pub(super) engine_version: u32,
    pub(super) parent_id: Option<i64>,
    pub(super) namespace: Option<Namespace>,
    pub(super) distroless: bool,
}

impl Store {
    /// Upserts a layer keyed by `(name, lineage)`.
    ///
    /// Fails with [`ScanError::NoNeedToInsert`] when the stored row was
    /// produced by an equal-or-newer engine, and with
    /// [`ScanError::ParentUnknown`] when the named parent has not been
    /// ingested under `parent_lineage`. The layer's feature list is treated
    /// as the full set observable at this layer; what is persisted is the
    /// diff against the parent's assembled set plus the normalized
    /// `removed_paths`.
    pub fn insert_layer(
        &self,
        layer: &Layer,
        lineage: &str,
        parent_lineage: &str,
        removed_paths: &[String],
    ) -> Result<()> {
        if layer.name.is_empty() {
            return Err(ScanError::bad_request(
                "cannot insert a layer without a name",
            ));
        }

        self.with_immediate_tx(|tx| {
            let existing = layer_row(tx, &layer.name, lineage)?;
            if let Some(row) = &existing {
                if row.engine_version >= layer.engine_version {
                    return Err(ScanError::NoNeedToInsert);
                }
            }

            let (parent_id, parent_features) = match layer.parent.as_deref() {
                Some(parent) if parent.name.is_empty() => {
                    return Err(ScanError::bad_request("parent layer has no name"));
                }
                Some(parent) => {
                    let row = layer_row(tx, &parent.name, parent_lineage)?
                        .ok_or(ScanError::ParentUnknown)?;
                    let chain = chain_rows(tx, row.clone())?;
                    let features = assemble_features(tx, &chain)?;
                    (Some(row.id), features)
                }
                None => (None, Vec::new()),
            };

            let resolved = resolve_features(layer, &parent_features);
            let parent_keys: HashSet<(String, String)> = parent_features
                .iter()
                .map(|fv| (fv.feature.name.clone(), fv.version.clone()))
                .collect();
            let resolved_names: HashSet<&str> =
                resolved.iter().map(|fv| fv.feature.name.as_str()).collect();

            let adds: Vec<&FeatureVersion> = resolved
                .iter()
                .filter(|fv| !parent_keys.contains(&(fv.feature.name.clone(), fv.version.clone())))
                .collect();
            // A layer without any feature set of its own inherits; one with a
            // set replaces, so vanished names become removals.
            let removals: Vec<&FeatureVersion> = if layer.features.is_empty() {
                Vec::new()
            } else {
                parent_features
                    .iter()
                    .filter(|fv| !resolved_names.contains(fv.feature.name.as_str()))
                    .collect()
            };

            let namespace_id = match &layer.namespace {
                Some(namespace) => Some(upsert_namespace(tx, namespace)?),
                None => None,
            };

            let layer_id = match existing {
                Some(row) => {
                    tx.execute(
                        "UPDATE layers SET engine_version = ?1, parent_id = ?2,
                         namespace_id = ?3, distroless = ?4 WHERE id = ?5",
                        params![
                            layer.engine_version,
                            parent_id,
                            namespace_id,
                            layer.distroless,
                            row.id
                        ],
                    )
                    .context("updating layer row")?;
                    tx.execute(
                        "DELETE FROM layer_diff_features WHERE layer_id = ?1",
                        params![row.id],
                    )
                    .context("clearing layer diff")?;
                    tx.execute(
                        "DELETE FROM layer_removed_paths WHERE layer_id = ?1",
                        params![row.id],
                    )
                    .context("clearing layer removed paths")?;
                    row.id
                }
                None => {
                    tx.execute(
                        "INSERT INTO layers(name, lineage, engine_version, parent_id,
                         namespace_id, distroless) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            layer.name,
                            lineage,
                            layer.engine_version,
                            parent_id,
                            namespace_id,
                            layer.distroless
                        ],
                    )
                    .context("inserting layer row")?;
                    tx.last_insert_rowid()
                }
            };

            for fv in adds {
                let fv_id = upsert_feature_version(tx, fv)?;
                tx.execute(
                    "INSERT OR IGNORE INTO layer_diff_features(layer_id, feature_version_id, removed)
                     VALUES (?1, ?2, 0)",
                    params![layer_id, fv_id],
                )
                .context("inserting layer feature add")?;
            }
            for fv in removals {
                let fv_id = upsert_feature_version(tx, fv)?;
                tx.execute(
                    "INSERT OR IGNORE INTO layer_diff_features(layer_id, feature_version_id, removed)
                     VALUES (?1, ?2, 1)",
                    params![layer_id, fv_id],
                )
                .context("inserting layer feature removal")?;
            }
            for path in removed_paths {
                tx.execute(
                    "INSERT OR IGNORE INTO layer_removed_paths(layer_id, path) VALUES (?1, ?2)",
                    params![layer_id, path],
                )
                .context("inserting layer removed path")?;
            }
            Ok(())
        })
    }

    /// Loads the layer keyed by `(name, lineage)`.
    ///
    /// With `with_features`, the effective feature set is reconstructed by a
    /// top-down walk of the ancestor chain: each layer's removals are
    /// applied before its additions, and an addition supersedes any earlier
    /// version of the same feature name. A feature removed by an ancestor
    /// only reappears when a later layer's own additions list it again;
    /// nothing is revived implicitly. With `with_vulnerabilities`, each
    /// feature carries its correlated vulnerabilities.
    pub fn find_layer(&self, name: &str, lineage: &str, options: &StoreOptions) -> Result<Layer> {
        let conn = self.connection()?;
        let row = layer_row(&conn, name, lineage)?.ok_or(ScanError::NotFound)?;

        let parent = match row.parent_id {
            Some(parent_id) => {
                let parent_row = layer_row_by_id(&conn, parent_id)?;
                Some(Box::new(Layer {
                    name: parent_row.name.clone(),
                    engine_version: parent_row.engine_version,
                    namespace: parent_row.namespace.clone(),
                    distroless: parent_row.distroless,
                    ..Layer::default()
                }))
            }
            None => None,
        };

        let mut features = Vec::new();
        if options.with_features || options.with_vulnerabilities {
            let chain = chain_rows(&conn, row.clone())?;
            features = assemble_features(&conn, &chain)?;
            if options.with_vulnerabilities {
                let mut by_namespace: HashMap<String, Vec<Vulnerability>> = HashMap::new();
                for fv in &mut features {
                    let namespace = fv.feature.namespace.name.clone();
                    if !by_namespace.contains_key(&namespace) {
                        let loaded = self.vulnerabilities_for_namespace_conn(&conn, &namespace)?;
                        by_namespace.insert(namespace.clone(), loaded);
                    }
                    fv.affected_by = matcher::affecting(fv, &by_namespace[&namespace]);
                }
            }
        }

        Ok(Layer {
            name: row.name,
            engine_version: row.engine_version,
            parent,
            namespace: row.namespace,
            distroless: row.distroless,
            features,
        })
    }

    /// Binds an external image reference to its top layer.
    pub fn register_image(
        &self,
        name: &str,
        digest: &str,
        layer_name: &str,
        lineage: &str,
    ) -> Result<()> {
        self.with_immediate_tx(|tx| {
            tx.execute(
                "INSERT INTO images(name, digest, layer_name, lineage) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name, digest) DO UPDATE SET layer_name = ?3, lineage = ?4",
                params![name, digest, layer_name, lineage],
            )
            .context("registering image")?;
            Ok(())
        })
    }

    /// Resolves an image digest to `(layer_name, lineage)`.
    pub fn get_layer_by_digest(&self, digest: &str) -> Result<Option<(String, String)>> {
        if digest.is_empty() {
            return Ok(None);
        }
        let conn = self.connection()?;
        lookup_image(&conn, "digest", digest)
    }

    /// Resolves an image name to `(layer_name, lineage)`.
    pub fn get_layer_by_name(&self, name: &str) -> Result<Option<(String, String)>> {
        if name.is_empty() {
            return Ok(None);
        }
        let conn = self.connection()?;
        lookup_image(&conn, "name", name)
    }

    pub(super) fn layer_id(&self, conn: &Connection, name: &str, lineage: &str) -> Result<i64> {
        Ok(layer_row(conn, name, lineage)?
            .ok_or(ScanError::NotFound)?
            .id)
    }

    pub(super) fn chain_of(&self, conn: &Connection, name: &str, lineage: &str) -> Result<Vec<LayerRow>> {
        let row = layer_row(conn, name, lineage)?.ok_or(ScanError::NotFound)?;
        chain_rows(conn, row)
    }
}

fn lookup_image(conn: &Connection, column: &str, value: &str) -> Result<Option<(String, String)>> {
    let sql =
        format!("SELECT layer_name, lineage FROM images WHERE {column} = ?1 ORDER BY id DESC");
    let mut statement = conn.prepare(&sql).context("preparing image lookup")?;
    let result = statement
        .query_row(params![value], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
        .context("querying image")?;
    Ok(result)
}

/// Fills namespaces from the parent (same name and version) or the layer,
/// dropping features that end up without one. Duplicate `(name, version)`
/// pairs collapse to the first occurrence.
fn resolve_features(layer: &Layer, parent_features: &[FeatureVersion]) -> Vec<FeatureVersion> {
    let parent_by_key: HashMap<(&str, &str), &FeatureVersion> = parent_features
        .iter()
        .map(|fv| ((fv.feature.name.as_str(), fv.version.as_str()), fv))
        .collect();

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut resolved = Vec::new();
    for fv in &layer.features {
        if !seen.insert((fv.feature.name.clone(), fv.version.clone())) {
            continue;
        }
        if let Some(parent_fv) =
            parent_by_key.get(&(fv.feature.name.as_str(), fv.version.as_str()))
        {
            // Same installation as the parent: its namespace is kept.
            resolved.push((*parent_fv).clone());
            continue;
        }
        let mut fv = fv.clone();
        if fv.feature.namespace.name.is_empty() {
            match &layer.namespace {
                Some(namespace) => fv.feature.namespace = namespace.clone(),
                None => {
                    warn!(
                        feature = %fv.feature.name,
                        version = %fv.version,
                        "dropping feature without namespace"
                    );
                    continue;
                }
            }
        }
        resolved.push(fv);
    }
    resolved
}

fn layer_row(conn: &Connection, name: &str, lineage: &str) -> Result<Option<LayerRow>> {
    let mut statement = conn
        .prepare(
            "SELECT l.id, l.name, l.engine_version, l.parent_id, l.distroless,
                    n.name, n.version_format
             FROM layers l LEFT JOIN namespaces n ON n.id = l.namespace_id
             WHERE l.name = ?1 AND l.lineage = ?2",
        )
        .context("preparing layer lookup")?;
    let row = statement
        .query_row(params![name, lineage], map_layer_row)
        .optional()
        .context("querying layer")?;
    Ok(row)
}

fn layer_row_by_id(conn: &Connection, id: i64) -> Result<LayerRow> {
    let mut statement = conn
        .prepare(
            "SELECT l.id, l.name, l.engine_version, l.parent_id, l.distroless,
                    n.name, n.version_format
             FROM layers l LEFT JOIN namespaces n ON n.id = l.namespace_id
             WHERE l.id = ?1",
        )
        .context("preparing layer lookup by id")?;
    let row = statement
        .query_row(params![id], map_layer_row)
        .context("querying layer by id")?;
    Ok(row)
}

fn map_layer_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LayerRow> {
    let namespace_name: Option<String> = row.get(5)?;
    let version_format: Option<String> = row.get(6)?;
    let namespace = match (namespace_name, version_format) {
        (Some(name), Some(format)) => Some(Namespace::new(name, format)),
        _ => None,
    };
    Ok(LayerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        engine_version: row.get(2)?,
        parent_id: row.get(3)?,
        distroless: row.get(4)?,
        namespace,
    })
}

/// Ancestor chain of `row`, root first, `row` last.
pub(super) fn chain_rows(conn: &Connection, row: LayerRow) -> Result<Vec<LayerRow>> {
    let mut chain = vec![row];
    while let Some(parent_id) = chain.last().and_then(|r| r.parent_id) {
        if chain.len() >= MAX_CHAIN_DEPTH {
            return Err(ScanError::Other(anyhow::anyhow!(
                "layer ancestry exceeds {MAX_CHAIN_DEPTH} levels"
            )));
        }
        chain.push(layer_row_by_id(conn, parent_id)?);
    }
    chain.reverse();
    Ok(chain)
}

/// Replays the chain's diffs top-down into the effective feature set.
pub(super) fn assemble_features(
    conn: &Connection,
    chain: &[LayerRow],
) -> Result<Vec<FeatureVersion>> {
    let mut effective: BTreeMap<String, FeatureVersion> = BTreeMap::new();
    for row in chain {
        let mut statement = conn
            .prepare(
                "SELECT f.name, n.name, n.version_format, fv.version,
                        fv.executable_deps, fv.library_deps, d.removed
                 FROM layer_diff_features d
                 JOIN feature_versions fv ON fv.id = d.feature_version_id
                 JOIN features f ON f.id = fv.feature_id
                 JOIN namespaces n ON n.id = f.namespace_id
                 WHERE d.layer_id = ?1
                 ORDER BY d.removed DESC, f.name, fv.version",
            )
            .context("preparing layer diff query")?;
        let rows = statement
            .query_map(params![row.id], |row| {
                let feature_name: String = row.get(0)?;
                let namespace_name: String = row.get(1)?;
                let version_format: String = row.get(2)?;
                let version: String = row.get(3)?;
                let executable_deps: String = row.get(4)?;
                let library_deps: String = row.get(5)?;
                let removed: bool = row.get(6)?;
                Ok((
                    feature_name,
                    namespace_name,
                    version_format,
                    version,
                    executable_deps,
                    library_deps,
                    removed,
                ))
            })
            .context("querying layer diff")?;

        for mapped in rows {
            let (feature_name, namespace_name, version_format, version, exec_deps, lib_deps, removed) =
                mapped.context("reading layer diff row")?;
            if removed {
                effective.remove(&feature_name);
                continue;
            }
            let fv = FeatureVersion {
                feature: Feature::new(
                    Namespace::new(namespace_name, version_format),
                    feature_name.clone(),
                ),
                version,
                executable_to_dependencies: decode_deps(&exec_deps),
                library_to_dependencies: decode_deps(&lib_deps),
                affected_by: Vec::new(),
            };
            effective.insert(feature_name, fv);
        }
    }
    Ok(effective.into_values().collect())
}

fn decode_deps(encoded: &str) -> DependencyMap {
    serde_json::from_str(encoded).unwrap_or_default()
}

pub(super) fn upsert_namespace(conn: &Connection, namespace: &Namespace) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO namespaces(name, version_format) VALUES (?1, ?2)",
        params![namespace.name, namespace.version_format],
    )
    .context("inserting namespace")?;
    let id = conn
        .query_row(
            "SELECT id FROM namespaces WHERE name = ?1 AND version_format = ?2",
            params![namespace.name, namespace.version_format],
            |row| row.get(0),
        )
        .context("querying namespace id")?;
    Ok(id)
}

pub(super) fn upsert_feature_version(conn: &Connection, fv: &FeatureVersion) -> Result<i64> {
    let namespace_id = upsert_namespace(conn, &fv.feature.namespace)?;
    conn.execute(
        "INSERT OR IGNORE INTO features(namespace_id, name) VALUES (?1, ?2)",
        params![namespace_id, fv.feature.name],
    )
    .context("inserting feature")?;
    let feature_id: i64 = conn
        .query_row(
            "SELECT id FROM features WHERE namespace_id = ?1 AND name = ?2",
            params![namespace_id, fv.feature.name],
            |row| row.get(0),
        )
        .context("querying feature id")?;

    let executable_deps =
        serde_json::to_string(&fv.executable_to_dependencies).context("encoding executable deps")?;
    let library_deps =
        serde_json::to_string(&fv.library_to_dependencies).context("encoding library deps")?;
    conn.execute(
        "INSERT INTO feature_versions(feature_id, version, executable_deps, library_deps)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(feature_id, version) DO NOTHING",
        params![feature_id, fv.version, executable_deps, library_deps],
    )
    .context("inserting feature version")?;
    let id = conn
        .query_row(
            "SELECT id FROM feature_versions WHERE feature_id = ?1 AND version = ?2",
            params![feature_id, fv.version],
            |row| row.get(0),
        )
        .context("querying feature version id")?;
    Ok(id)
}
