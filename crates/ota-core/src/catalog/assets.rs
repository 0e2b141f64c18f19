use std::path::Path;

use ota_domain::{Asset, HashType, UpdateStatus};
use rusqlite::{params, OptionalExtension, Transaction};
use tracing::debug;

use super::{
    asset_from_row, parse_status, path_to_sql,
    updates::{promote_if_complete, update_exists},
    Catalog, ASSET_COLUMNS,
};
use crate::error::{Result, UpdatesError};

impl Catalog {
    /// Link `assets` to an update, inserting rows for unseen `(key, hash_type)`
    /// pairs and reusing existing ones.
    ///
    /// A known row gains a `local_path` when one is supplied and loses any
    /// pending deletion mark. The update is promoted in the same transaction
    /// once every linked asset is present; the returned status reflects that.
    pub fn add_assets(&self, assets: &[Asset], update_id: &str) -> Result<UpdateStatus> {
        self.with_immediate_tx(|tx| {
            if !update_exists(tx, update_id)? {
                return Err(UpdatesError::UnknownUpdate(update_id.to_string()));
            }
            for asset in assets {
                let asset_id = upsert_asset(tx, asset)?;
                tx.execute(
                    "INSERT INTO update_assets(update_id, asset_id, is_launch_asset) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT(update_id, asset_id) DO UPDATE SET is_launch_asset = excluded.is_launch_asset",
                    params![update_id, asset_id, asset.is_launch_asset],
                )?;
            }
            debug!(update = %update_id, assets = assets.len(), "assets linked");
            promote_if_complete(tx, update_id)?;
            current_status(tx, update_id)
        })
    }

    /// Record where an asset's file now lives and promote every pending update
    /// that became complete. Returns the ids of promoted updates.
    pub fn update_asset_local_path(
        &self,
        key: &str,
        hash_type: HashType,
        path: &Path,
    ) -> Result<Vec<String>> {
        self.with_immediate_tx(|tx| {
            let changed = tx.execute(
                "UPDATE assets SET local_path = ?3, marked_for_deletion = 0 \
                 WHERE key = ?1 AND hash_type = ?2",
                params![key, hash_type.as_str(), path_to_sql(path)],
            )?;
            if changed == 0 {
                return Err(UpdatesError::UnknownAsset {
                    key: key.to_string(),
                    hash_type: hash_type.as_str(),
                });
            }
            let pending = {
                let mut stmt = tx.prepare(
                    "SELECT DISTINCT u.id FROM updates u \
                     JOIN update_assets ua ON ua.update_id = u.id \
                     JOIN assets a ON a.id = ua.asset_id \
                     WHERE a.key = ?1 AND a.hash_type = ?2 AND u.status = 'pending' \
                     ORDER BY u.id",
                )?;
                let ids = stmt
                    .query_map(params![key, hash_type.as_str()], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };
            let mut promoted = Vec::new();
            for update_id in pending {
                if promote_if_complete(tx, &update_id)?.is_some() {
                    promoted.push(update_id);
                }
            }
            Ok(promoted)
        })
    }

    /// Assets linked to an update, launch flag included.
    pub fn assets_for_update(&self, update_id: &str) -> Result<Vec<Asset>> {
        let conn = self.connection()?;
        if conn
            .query_row(
                "SELECT 1 FROM updates WHERE id = ?1",
                params![update_id],
                |_| Ok(()),
            )
            .optional()?
            .is_none()
        {
            return Err(UpdatesError::UnknownUpdate(update_id.to_string()));
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS}, ua.is_launch_asset FROM update_assets ua \
             JOIN assets a ON a.id = ua.asset_id \
             WHERE ua.update_id = ?1 ORDER BY a.id"
        ))?;
        let assets = stmt
            .query_map(params![update_id], asset_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(assets)
    }

    pub fn launch_asset_for_update(&self, update_id: &str) -> Result<Option<Asset>> {
        let conn = self.connection()?;
        let asset = conn
            .query_row(
                &format!(
                    "SELECT {ASSET_COLUMNS}, ua.is_launch_asset FROM update_assets ua \
                     JOIN assets a ON a.id = ua.asset_id \
                     WHERE ua.update_id = ?1 AND ua.is_launch_asset = 1"
                ),
                params![update_id],
                asset_from_row,
            )
            .optional()?;
        Ok(asset)
    }

    pub fn asset_by_key(&self, key: &str, hash_type: HashType) -> Result<Option<Asset>> {
        let conn = self.connection()?;
        let asset = conn
            .query_row(
                &format!(
                    "SELECT {ASSET_COLUMNS}, 0 FROM assets a \
                     WHERE a.key = ?1 AND a.hash_type = ?2"
                ),
                params![key, hash_type.as_str()],
                asset_from_row,
            )
            .optional()?;
        Ok(asset)
    }
}

fn upsert_asset(tx: &Transaction<'_>, asset: &Asset) -> Result<i64> {
    let hash_type = asset.hash_type.as_str();
    let local_path = asset.local_path.as_deref().map(path_to_sql);
    let url = asset.url.as_ref().map(url::Url::as_str);
    let existing: Option<(i64, String)> = tx
        .query_row(
            "SELECT id, content_hash FROM assets WHERE key = ?1 AND hash_type = ?2",
            params![asset.key, hash_type],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((id, content_hash)) => {
            if !content_hash.eq_ignore_ascii_case(&asset.content_hash) {
                return Err(UpdatesError::AssetConflict {
                    key: asset.key.clone(),
                    hash_type,
                    existing: content_hash,
                    incoming: asset.content_hash.clone(),
                });
            }
            tx.execute(
                "UPDATE assets SET \
                 local_path = COALESCE(?2, local_path), \
                 url = COALESCE(url, ?3), \
                 embedded_path = COALESCE(embedded_path, ?4), \
                 marked_for_deletion = 0 \
                 WHERE id = ?1",
                params![id, local_path, url, asset.embedded_path],
            )?;
            Ok(id)
        }
        None => {
            tx.execute(
                "INSERT INTO assets(key, hash_type, content_hash, url, local_path, embedded_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    asset.key,
                    hash_type,
                    asset.content_hash.to_ascii_lowercase(),
                    url,
                    local_path,
                    asset.embedded_path,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        }
    }
}

fn current_status(tx: &Transaction<'_>, update_id: &str) -> Result<UpdateStatus> {
    let status: String = tx.query_row(
        "SELECT status FROM updates WHERE id = ?1",
        params![update_id],
        |row| row.get(0),
    )?;
    parse_status(&status)
}
