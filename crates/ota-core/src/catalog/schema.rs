//! Connection setup, schema creation, and meta version enforcement.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use super::Catalog;
use crate::error::{Result, UpdatesError};

pub(crate) const SCHEMA_VERSION: u32 = 1;
const META_KEY_SCHEMA_VERSION: &str = "schema_version";
const META_KEY_CREATED_BY: &str = "created_by_version";
const META_KEY_LAST_USED: &str = "last_used_version";
const OTA_VERSION: &str = env!("CARGO_PKG_VERSION");

impl Catalog {
    pub(super) fn init_database(&self) -> Result<()> {
        let mut conn = self.connection_raw().map_err(|err| self.unavailable(&err))?;
        init_schema(&conn).map_err(|err| self.unavailable(&err))?;
        ensure_meta(&mut conn)?;
        debug!(path = %self.database_path().display(), "catalog ready");
        Ok(())
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        let conn = self.connection_raw()?;
        conn.busy_timeout(Duration::from_secs(10))?;
        Ok(conn)
    }

    pub(crate) fn with_immediate_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn connection_raw(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(self.database_path())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn unavailable(&self, err: &rusqlite::Error) -> UpdatesError {
        UpdatesError::StoreUnavailable {
            path: self.database_path(),
            reason: err.to_string(),
        }
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(10))?;
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS updates (
            id TEXT PRIMARY KEY,
            commit_time INTEGER NOT NULL,
            binary_compatibility TEXT NOT NULL,
            metadata TEXT NOT NULL,
            status TEXT NOT NULL,
            raw_manifest TEXT NOT NULL,
            embedded INTEGER NOT NULL DEFAULT 0,
            marked_for_deletion INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            hash_type TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            url TEXT,
            local_path TEXT,
            embedded_path TEXT,
            marked_for_deletion INTEGER NOT NULL DEFAULT 0,
            UNIQUE(key, hash_type)
        );
        CREATE TABLE IF NOT EXISTS update_assets (
            update_id TEXT NOT NULL,
            asset_id INTEGER NOT NULL,
            is_launch_asset INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(update_id, asset_id),
            FOREIGN KEY(update_id) REFERENCES updates(id) ON DELETE CASCADE,
            FOREIGN KEY(asset_id) REFERENCES assets(id)
        );
        CREATE INDEX IF NOT EXISTS update_assets_by_asset ON update_assets(asset_id);
        ",
    )
}

fn ensure_meta(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params![META_KEY_SCHEMA_VERSION, SCHEMA_VERSION.to_string()],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params![META_KEY_CREATED_BY, OTA_VERSION],
    )?;
    tx.commit()?;

    enforce_meta_version(conn, META_KEY_SCHEMA_VERSION, SCHEMA_VERSION)?;
    conn.execute(
        "INSERT INTO meta(key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![META_KEY_LAST_USED, OTA_VERSION],
    )?;
    Ok(())
}

fn enforce_meta_version(conn: &Connection, key: &str, expected: u32) -> Result<()> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    let incompatible = |found: String| UpdatesError::IncompatibleSchema {
        key: key.to_string(),
        expected: expected.to_string(),
        found,
    };
    let value = value.ok_or_else(|| incompatible("<missing>".to_string()))?;
    match value.parse::<u32>() {
        Ok(parsed) if parsed == expected => Ok(()),
        _ => Err(incompatible(value)),
    }
}

#[cfg(test)]
pub(crate) fn overwrite_meta(catalog: &Catalog, key: &str, value: &str) -> Result<()> {
    catalog.connection()?.execute(
        "UPDATE meta SET value = ?2 WHERE key = ?1",
        params![key, value],
    )?;
    Ok(())
}
