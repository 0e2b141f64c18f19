//! Persistent catalog of updates, assets, and the relation between them.
//!
//! The catalog lives in a single SQLite database under the store root. Every
//! operation opens its own connection; every mutation runs inside an
//! `IMMEDIATE` transaction so concurrent writers serialize on the database
//! lock while readers keep seeing committed snapshots through WAL.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use ota_domain::{Asset, HashType, Update, UpdateStatus};
use rusqlite::{types::Type, Row};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Result, UpdatesError};

mod assets;
mod gc;
mod schema;
mod updates;

#[cfg(test)]
mod tests;

pub(crate) const ASSETS_DIR: &str = "assets";
const DATABASE_FILENAME: &str = "catalog.sqlite";

pub(crate) const UPDATE_COLUMNS: &str =
    "u.id, u.commit_time, u.binary_compatibility, u.metadata, u.status, u.raw_manifest";
pub(crate) const ASSET_COLUMNS: &str =
    "a.id, a.key, a.hash_type, a.content_hash, a.url, a.local_path, a.embedded_path";

/// Handle on the catalog database and the asset directory beside it.
#[derive(Clone, Debug)]
pub struct Catalog {
    root: PathBuf,
}

/// Diagnostic view of one catalogued update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpdateEntry {
    pub update: Update,
    pub marked_for_deletion: bool,
    pub asset_count: usize,
}

impl Catalog {
    /// Open (or create) the catalog rooted at `root`.
    ///
    /// # Errors
    /// `StoreUnavailable` when the directory or database cannot be opened,
    /// `IncompatibleSchema` when the database was written by an incompatible
    /// schema version.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let catalog = Self { root: root.into() };
        catalog.ensure_layout()?;
        Ok(catalog)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub(crate) fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILENAME)
    }

    /// Deterministic location of an asset's file inside the store.
    #[must_use]
    pub fn asset_path(&self, asset: &Asset) -> PathBuf {
        let digest = hex::encode(Sha256::digest(asset.key.as_bytes()));
        let shard = digest.get(0..2).unwrap_or("xx").to_string();
        let mut file_name = digest;
        if let Some(extension) = key_extension(&asset.key) {
            file_name.push('.');
            file_name.push_str(extension);
        }
        self.assets_dir()
            .join(asset.hash_type.as_str())
            .join(shard)
            .join(file_name)
    }

    /// Whether `path` sits inside this catalog's asset directory.
    pub(crate) fn owns_path(&self, path: &Path) -> bool {
        path.starts_with(self.assets_dir())
    }

    fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.assets_dir()).map_err(|err| UpdatesError::StoreUnavailable {
            path: self.root.clone(),
            reason: err.to_string(),
        })?;
        self.init_database()
    }
}

fn key_extension(key: &str) -> Option<&str> {
    let (_, extension) = key.rsplit_once('.')?;
    let valid = !extension.is_empty()
        && extension.len() <= 8
        && extension.bytes().all(|b| b.is_ascii_alphanumeric());
    valid.then_some(extension)
}

pub(crate) fn timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub(crate) fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

pub(crate) fn parse_status(status: &str) -> Result<UpdateStatus> {
    UpdateStatus::try_from(status).map_err(|err| UpdatesError::Database(conversion_error(0, err)))
}

/// Decode a row selected with [`UPDATE_COLUMNS`].
pub(crate) fn update_from_row(row: &Row<'_>) -> rusqlite::Result<Update> {
    let metadata: String = row.get(3)?;
    let metadata = match serde_json::from_str::<Value>(&metadata) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(err) => return Err(conversion_error(3, err)),
    };
    let status: String = row.get(4)?;
    let status = UpdateStatus::try_from(status.as_str()).map_err(|err| conversion_error(4, err))?;
    Ok(Update {
        id: row.get(0)?,
        commit_time: row.get(1)?,
        binary_compatibility: row.get(2)?,
        metadata,
        status,
        raw_manifest: row.get(5)?,
    })
}

/// Decode a row selected with [`ASSET_COLUMNS`] followed by the launch flag.
pub(crate) fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let hash_type: String = row.get(2)?;
    let hash_type =
        HashType::try_from(hash_type.as_str()).map_err(|err| conversion_error(2, err))?;
    let url = row
        .get::<_, Option<String>>(4)?
        .map(|raw| Url::parse(&raw).map_err(|err| conversion_error(4, err)))
        .transpose()?;
    Ok(Asset {
        row_id: Some(row.get(0)?),
        key: row.get(1)?,
        hash_type,
        content_hash: row.get(3)?,
        url,
        local_path: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        is_launch_asset: row.get(7)?,
        embedded_path: row.get(6)?,
    })
}
