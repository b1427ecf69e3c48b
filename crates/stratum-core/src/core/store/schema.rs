//! Ledger schema initialization (SQLite DDL).

use anyhow::{Context, Result};
use rusqlite::Connection;

pub(super) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS namespaces (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            version_format TEXT NOT NULL,
            UNIQUE(name, version_format)
        );
        CREATE TABLE IF NOT EXISTS features (
            id INTEGER PRIMARY KEY,
            namespace_id INTEGER NOT NULL REFERENCES namespaces(id),
            name TEXT NOT NULL,
            UNIQUE(namespace_id, name)
        );
        CREATE TABLE IF NOT EXISTS feature_versions (
            id INTEGER PRIMARY KEY,
            feature_id INTEGER NOT NULL REFERENCES features(id),
            version TEXT NOT NULL,
            executable_deps TEXT NOT NULL DEFAULT '{}',
            library_deps TEXT NOT NULL DEFAULT '{}',
            UNIQUE(feature_id, version)
        );
        CREATE TABLE IF NOT EXISTS layers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            lineage TEXT NOT NULL,
            engine_version INTEGER NOT NULL,
            parent_id INTEGER REFERENCES layers(id),
            namespace_id INTEGER REFERENCES namespaces(id),
            distroless INTEGER NOT NULL DEFAULT 0,
            UNIQUE(name, lineage)
        );
        CREATE TABLE IF NOT EXISTS layer_diff_features (
            layer_id INTEGER NOT NULL REFERENCES layers(id) ON DELETE CASCADE,
            feature_version_id INTEGER NOT NULL REFERENCES feature_versions(id),
            removed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(layer_id, feature_version_id, removed)
        );
        CREATE TABLE IF NOT EXISTS layer_removed_paths (
            layer_id INTEGER NOT NULL REFERENCES layers(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            PRIMARY KEY(layer_id, path)
        );
        CREATE TABLE IF NOT EXISTS layer_components (
            layer_id INTEGER PRIMARY KEY REFERENCES layers(id) ON DELETE CASCADE,
            components TEXT NOT NULL DEFAULT '[]',
            removed_paths TEXT NOT NULL DEFAULT '[]'
        );
        CREATE TABLE IF NOT EXISTS vulnerabilities (
            id INTEGER PRIMARY KEY,
            namespace_id INTEGER NOT NULL REFERENCES namespaces(id),
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            link TEXT NOT NULL DEFAULT '',
            severity TEXT NOT NULL DEFAULT 'Unknown',
            metadata TEXT,
            UNIQUE(namespace_id, name)
        );
        CREATE TABLE IF NOT EXISTS vulnerability_fixed_in (
            vulnerability_id INTEGER NOT NULL REFERENCES vulnerabilities(id) ON DELETE CASCADE,
            feature_name TEXT NOT NULL,
            version TEXT NOT NULL,
            PRIMARY KEY(vulnerability_id, feature_name)
        );
        CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            digest TEXT NOT NULL DEFAULT '',
            layer_name TEXT NOT NULL,
            lineage TEXT NOT NULL,
            UNIQUE(name, digest)
        );
        CREATE TABLE IF NOT EXISTS rhelv2_layers (
            id INTEGER PRIMARY KEY,
            hash TEXT NOT NULL UNIQUE,
            parent_hash TEXT NOT NULL DEFAULT '',
            dist TEXT NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS rhelv2_vulnerabilities (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            payload TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS rhelv2_vulnerability_cpes (
            vulnerability_id INTEGER NOT NULL
                REFERENCES rhelv2_vulnerabilities(id) ON DELETE CASCADE,
            cpe TEXT NOT NULL,
            PRIMARY KEY(vulnerability_id, cpe)
        );
        CREATE INDEX IF NOT EXISTS idx_rhelv2_vuln_cpes_cpe
            ON rhelv2_vulnerability_cpes(cpe);
        CREATE TABLE IF NOT EXISTS keyvalue (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS locks (
            name TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            until INTEGER NOT NULL
        );
        "#,
    )
    .context("failed to initialize ledger schema")?;
    Ok(())
}
