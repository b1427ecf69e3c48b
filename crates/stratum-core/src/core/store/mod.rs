//! The layered feature ledger.
//!
//! SQLite-backed, one connection per call, WAL journaling, and immediate
//! transactions for every write so concurrent readers observe pre- or
//! post-transaction state only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rusqlite::{Connection, TransactionBehavior};

use crate::core::errors::{Result, ScanError};

mod component;
mod keyvalue;
mod layer;
mod rhelv2;
mod schema;
mod vulnerability;

pub use component::LayerComponents;

/// Singleton key recording the `until` timestamp of the last applied dump.
pub const VULN_UPDATE_TIMESTAMP_KEY: &str = "vuln-update-timestamp";

/// Read options for [`Store::find_layer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreOptions {
    pub with_features: bool,
    pub with_vulnerabilities: bool,
    pub uncertified_rhel: bool,
}

impl StoreOptions {
    pub fn with_features() -> Self {
        Self {
            with_features: true,
            ..Self::default()
        }
    }

    pub fn with_vulnerabilities() -> Self {
        Self {
            with_features: true,
            with_vulnerabilities: true,
            ..Self::default()
        }
    }
}

/// Handle to the ledger database. Cheap to clone; every operation opens its
/// own connection.
#[derive(Clone, Debug)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Opens (creating if needed) the ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = store.connection()?;
        schema::init_schema(&conn).map_err(ScanError::Other)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open ledger at {}", self.path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL for ledger")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys for ledger")?;
        conn.busy_timeout(Duration::from_secs(10))
            .context("failed to set busy timeout for ledger")?;
        Ok(conn)
    }

    fn with_immediate_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start ledger transaction")?;
        let result = f(&tx)?;
        tx.commit().context("failed to commit ledger transaction")?;
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Store;

    /// Opens a throwaway ledger in a fresh temp dir.
    pub(crate) fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("ledger.sqlite")).expect("open store");
        (dir, store)
    }
}
