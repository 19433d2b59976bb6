//! The relational half of the cache: a small SQLite-backed index of
//! `(bundle, key) -> (uuid, size, last_access)` rows, plus a flat
//! `properties` key/value table used for schema/version tracking.
//!
//! [`IndexDb`] knows nothing about quotas or eviction policy — that lives in
//! [`crate::CacheManager`], which is the sole caller of this module.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// One row of the `entries` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub bundle: i64,
    pub key: String,
    pub uuid: String,
    pub size: u64,
    pub last_access: i64,
}

/// Per-bundle aggregates, as read back from `entries` on open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleStats {
    pub count: u64,
    pub total_size: u64,
}

pub struct IndexDb {
    conn: Connection,
}

impl IndexDb {
    /// Opens (creating and migrating if necessary) the index database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = OFF;
             CREATE TABLE IF NOT EXISTS entries (
                 bundle      INTEGER NOT NULL,
                 key         TEXT    NOT NULL,
                 uuid        TEXT    NOT NULL,
                 size        INTEGER NOT NULL,
                 last_access INTEGER NOT NULL,
                 PRIMARY KEY (bundle, key)
             );
             CREATE INDEX IF NOT EXISTS entries_by_bundle_last_access
                 ON entries (bundle, last_access, key);
             CREATE TABLE IF NOT EXISTS properties (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE entries (
                 bundle      INTEGER NOT NULL,
                 key         TEXT    NOT NULL,
                 uuid        TEXT    NOT NULL,
                 size        INTEGER NOT NULL,
                 last_access INTEGER NOT NULL,
                 PRIMARY KEY (bundle, key)
             );
             CREATE TABLE properties (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    /// `MAX(last_access) + 1` across every bundle, for bootstrapping the
    /// in-memory counter on open. Returns `0` for an empty database.
    pub fn max_last_access(&self) -> Result<i64> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(last_access) FROM entries", [], |row| row.get(0))?;
        Ok(max.unwrap_or(-1) + 1)
    }

    /// Replaces any existing row for `(bundle, key)` with a new one, inside
    /// a single transaction (delete-then-insert, so `(bundle, key)` is never
    /// visible with two rows at once).
    pub fn upsert_entry(&mut self, entry: &CacheEntry) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM entries WHERE bundle = ?1 AND key = ?2",
            params![entry.bundle, entry.key],
        )?;
        tx.execute(
            "INSERT INTO entries (bundle, key, uuid, size, last_access) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.bundle, entry.key, entry.uuid, entry.size as i64, entry.last_access],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_entry(&self, bundle: i64, key: &str) -> Result<Option<CacheEntry>> {
        self.conn
            .query_row(
                "SELECT bundle, key, uuid, size, last_access FROM entries
                 WHERE bundle = ?1 AND key = ?2",
                params![bundle, key],
                Self::row_to_entry,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Deletes the row for `(bundle, key)` if present, returning the entry it
    /// held so the caller can delete the matching blob and adjust its
    /// in-memory counters without a second round-trip.
    pub fn delete_entry(&mut self, bundle: i64, key: &str) -> Result<Option<CacheEntry>> {
        let tx = self.conn.transaction()?;
        let removed = tx
            .query_row(
                "SELECT bundle, key, uuid, size, last_access FROM entries
                 WHERE bundle = ?1 AND key = ?2",
                params![bundle, key],
                Self::row_to_entry,
            )
            .optional()?;
        if removed.is_some() {
            tx.execute(
                "DELETE FROM entries WHERE bundle = ?1 AND key = ?2",
                params![bundle, key],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// The oldest entry in `bundle` by `last_access`, ties broken by
    /// ascending `key`.
    pub fn oldest_entry(&self, bundle: i64) -> Result<Option<CacheEntry>> {
        self.conn
            .query_row(
                "SELECT bundle, key, uuid, size, last_access FROM entries
                 WHERE bundle = ?1
                 ORDER BY last_access ASC, key ASC
                 LIMIT 1",
                params![bundle],
                Self::row_to_entry,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn bundle_stats(&self, bundle: i64) -> Result<BundleStats> {
        self.conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM entries WHERE bundle = ?1",
                params![bundle],
                |row| {
                    Ok(BundleStats {
                        count: row.get::<_, i64>(0)? as u64,
                        total_size: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Deletes every row in `bundle`, returning the uuids it referenced.
    pub fn clear_bundle(&mut self, bundle: i64) -> Result<Vec<String>> {
        let tx = self.conn.transaction()?;
        let uuids = {
            let mut stmt = tx.prepare("SELECT uuid FROM entries WHERE bundle = ?1")?;
            let rows = stmt.query_map(params![bundle], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute("DELETE FROM entries WHERE bundle = ?1", params![bundle])?;
        tx.commit()?;
        Ok(uuids)
    }

    /// Deletes every row in the database, returning the uuids it referenced.
    pub fn clear_all(&mut self) -> Result<Vec<String>> {
        let tx = self.conn.transaction()?;
        let uuids = {
            let mut stmt = tx.prepare("SELECT uuid FROM entries")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute("DELETE FROM entries", [])?;
        tx.commit()?;
        Ok(uuids)
    }

    /// All distinct bundle ids currently holding at least one entry. Used to
    /// rebuild per-bundle statistics on open.
    pub fn bundles_in_use(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT bundle FROM entries")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every entry in the database. Used only by the sanity check, which is
    /// never on the hot path.
    pub fn all_entries(&self) -> Result<Vec<CacheEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT bundle, key, uuid, size, last_access FROM entries")?;
        let rows = stmt.query_map([], Self::row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_property(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM properties WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO properties (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
        Ok(CacheEntry {
            bundle: row.get(0)?,
            key: row.get(1)?,
            uuid: row.get(2)?,
            size: row.get::<_, i64>(3)? as u64,
            last_access: row.get(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(bundle: i64, key: &str, uuid: &str, size: u64, last_access: i64) -> CacheEntry {
        CacheEntry {
            bundle,
            key: key.to_owned(),
            uuid: uuid.to_owned(),
            size,
            last_access,
        }
    }

    #[test]
    fn upsert_overwrites_by_primary_key() {
        let mut db = IndexDb::open_in_memory().unwrap();
        db.upsert_entry(&entry(0, "k", "uuid-1", 10, 1)).unwrap();
        db.upsert_entry(&entry(0, "k", "uuid-2", 20, 2)).unwrap();

        let got = db.get_entry(0, "k").unwrap().unwrap();
        assert_eq!(got.uuid, "uuid-2");
        assert_eq!(got.size, 20);
        assert_eq!(db.bundle_stats(0).unwrap().count, 1);
    }

    #[test]
    fn oldest_entry_ties_break_on_key() {
        let mut db = IndexDb::open_in_memory().unwrap();
        db.upsert_entry(&entry(0, "b", "u1", 1, 5)).unwrap();
        db.upsert_entry(&entry(0, "a", "u2", 1, 5)).unwrap();

        let oldest = db.oldest_entry(0).unwrap().unwrap();
        assert_eq!(oldest.key, "a");
    }

    #[test]
    fn clear_bundle_only_touches_that_bundle() {
        let mut db = IndexDb::open_in_memory().unwrap();
        db.upsert_entry(&entry(0, "a", "u1", 1, 1)).unwrap();
        db.upsert_entry(&entry(1, "b", "u2", 1, 2)).unwrap();

        let removed = db.clear_bundle(0).unwrap();
        assert_eq!(removed, vec!["u1".to_owned()]);
        assert!(db.get_entry(0, "a").unwrap().is_none());
        assert!(db.get_entry(1, "b").unwrap().is_some());
    }

    #[test]
    fn properties_roundtrip_and_overwrite() {
        let db = IndexDb::open_in_memory().unwrap();
        assert_eq!(db.get_property("v").unwrap(), None);
        db.set_property("v", "1.0").unwrap();
        assert_eq!(db.get_property("v").unwrap(), Some("1.0".to_owned()));
        db.set_property("v", "2.0").unwrap();
        assert_eq!(db.get_property("v").unwrap(), Some("2.0".to_owned()));
    }
}
