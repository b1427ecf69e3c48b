//! Singleton key/value state and advisory locks.

use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use time::{Duration, OffsetDateTime};

use crate::core::errors::Result;

use super::Store;

impl Store {
    pub fn get_key_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM keyvalue WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("querying key/value")?;
        Ok(value)
    }

    pub fn update_key_value(&self, key: &str, value: &str) -> Result<()> {
        self.with_immediate_tx(|tx| {
            tx.execute(
                "INSERT INTO keyvalue(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )
            .context("upserting key/value")?;
            Ok(())
        })
    }

    /// Acquires (or refreshes) a named advisory lock for `owner`.
    ///
    /// Returns `false` when another live owner holds the lock. Expired locks
    /// are taken over; the same owner refreshing extends the expiry, which
    /// is how long-running holders stay safe across node failure.
    pub fn acquire_lock(&self, name: &str, owner: &str, duration: Duration) -> Result<bool> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let until = now + duration.whole_seconds();
        self.with_immediate_tx(|tx| {
            let existing: Option<(String, i64)> = tx
                .query_row(
                    "SELECT owner, until FROM locks WHERE name = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("querying lock")?;
            match existing {
                Some((holder, expiry)) if holder != owner && expiry > now => Ok(false),
                _ => {
                    tx.execute(
                        "INSERT INTO locks(name, owner, until) VALUES (?1, ?2, ?3)
                         ON CONFLICT(name) DO UPDATE SET owner = ?2, until = ?3",
                        params![name, owner, until],
                    )
                    .context("upserting lock")?;
                    Ok(true)
                }
            }
        })
    }

    /// Releases a lock if (and only if) `owner` holds it.
    pub fn release_lock(&self, name: &str, owner: &str) -> Result<()> {
        self.with_immediate_tx(|tx| {
            tx.execute(
                "DELETE FROM locks WHERE name = ?1 AND owner = ?2",
                params![name, owner],
            )
            .context("releasing lock")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::temp_store;
    use super::*;

    #[test]
    fn key_value_roundtrip() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get_key_value("missing").unwrap(), None);
        store.update_key_value("k", "v1").unwrap();
        store.update_key_value("k", "v2").unwrap();
        assert_eq!(store.get_key_value("k").unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn locks_exclude_other_owners_until_expiry() {
        let (_dir, store) = temp_store();
        assert!(store
            .acquire_lock("updater", "node-a", Duration::minutes(5))
            .unwrap());
        assert!(!store
            .acquire_lock("updater", "node-b", Duration::minutes(5))
            .unwrap());
        // The holder can refresh its own lock.
        assert!(store
            .acquire_lock("updater", "node-a", Duration::minutes(5))
            .unwrap());
        store.release_lock("updater", "node-a").unwrap();
        assert!(store
            .acquire_lock("updater", "node-b", Duration::minutes(5))
            .unwrap());
    }

    #[test]
    fn expired_locks_are_taken_over() {
        let (_dir, store) = temp_store();
        assert!(store
            .acquire_lock("notifier", "node-a", Duration::seconds(-1))
            .unwrap());
        assert!(store
            .acquire_lock("notifier", "node-b", Duration::minutes(1))
            .unwrap());
    }
}
