//! Mark and delete phases of catalog garbage collection.
//!
//! Marking is advisory: any later `add_assets` or `update_asset_local_path`
//! clears an asset's mark. The delete phase re-checks that an asset is still
//! marked and still unreferenced by a live update inside the deleting
//! transaction, so rows resurrected between the phases survive.

use std::{collections::HashSet, path::PathBuf};

use ota_domain::{Asset, Update};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{asset_from_row, update_from_row, Catalog, ASSET_COLUMNS, UPDATE_COLUMNS};
use crate::error::{Result, UpdatesError};

const LIVE_REFERENCE: &str = "EXISTS (SELECT 1 FROM update_assets ua \
     JOIN updates u ON u.id = ua.update_id \
     WHERE ua.asset_id = a.id AND u.marked_for_deletion = 0)";

impl Catalog {
    /// Mark every update older than the launched one for deletion, except the
    /// launched update itself and embedded baselines the running binary can
    /// still launch. Embedded updates left behind by an earlier binary are
    /// collected like any other. Returns the newly marked updates.
    pub fn mark_for_deletion(&self, launched_id: &str, binary_token: &str) -> Result<Vec<Update>> {
        self.with_immediate_tx(|tx| {
            let launched_commit: i64 = tx
                .query_row(
                    "SELECT commit_time FROM updates WHERE id = ?1",
                    params![launched_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| UpdatesError::UnknownUpdate(launched_id.to_string()))?;
            tx.execute(
                "UPDATE updates SET marked_for_deletion = 0 WHERE id = ?1",
                params![launched_id],
            )?;

            let marked: Vec<Update> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {UPDATE_COLUMNS}, u.embedded FROM updates u \
                     WHERE u.commit_time < ?1 AND u.id != ?2 AND u.marked_for_deletion = 0 \
                     ORDER BY u.commit_time DESC, u.id ASC"
                ))?;
                let rows = stmt
                    .query_map(params![launched_commit, launched_id], |row| {
                        Ok((update_from_row(row)?, row.get::<_, bool>(6)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter()
                    .filter(|(update, embedded)| {
                        !(*embedded && update.is_compatible_with(binary_token))
                    })
                    .map(|(update, _)| update)
                    .collect()
            };
            for update in &marked {
                tx.execute(
                    "UPDATE updates SET marked_for_deletion = 1 WHERE id = ?1",
                    params![update.id],
                )?;
            }
            debug!(launched = %launched_id, marked = marked.len(), "updates marked for deletion");
            Ok(marked)
        })
    }

    /// Mark assets that no unmarked update references. Marks on assets that
    /// became referenced again are cleared. Returns the marked assets.
    pub fn mark_unused_assets_for_deletion(&self) -> Result<Vec<Asset>> {
        self.with_immediate_tx(|tx| {
            tx.execute(
                &format!(
                    "UPDATE assets SET marked_for_deletion = 0 \
                     WHERE marked_for_deletion = 1 AND id IN \
                     (SELECT a.id FROM assets a WHERE {LIVE_REFERENCE})"
                ),
                [],
            )?;
            tx.execute(
                &format!(
                    "UPDATE assets SET marked_for_deletion = 1 \
                     WHERE id IN (SELECT a.id FROM assets a WHERE NOT {LIVE_REFERENCE})"
                ),
                [],
            )?;
            let mut stmt = tx.prepare(&format!(
                "SELECT {ASSET_COLUMNS}, 0 FROM assets a \
                 WHERE a.marked_for_deletion = 1 ORDER BY a.id"
            ))?;
            let assets = stmt
                .query_map([], asset_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(assets)
        })
    }

    /// Delete asset rows that are still marked and still unreferenced by any
    /// unmarked update. Rows that fail the re-check are left alone. Returns the
    /// deleted rows so the caller can remove their files.
    pub fn delete_assets(&self, ids: &[i64]) -> Result<Vec<Asset>> {
        self.with_immediate_tx(|tx| {
            let mut deleted = Vec::new();
            for id in ids {
                let eligible = tx
                    .query_row(
                        &format!(
                            "SELECT {ASSET_COLUMNS}, 0 FROM assets a \
                             WHERE a.id = ?1 AND a.marked_for_deletion = 1 AND NOT {LIVE_REFERENCE}"
                        ),
                        params![id],
                        asset_from_row,
                    )
                    .optional()?;
                let Some(asset) = eligible else {
                    debug!(asset_id = id, "asset resurrected or gone; skipping delete");
                    continue;
                };
                tx.execute("DELETE FROM update_assets WHERE asset_id = ?1", params![id])?;
                tx.execute("DELETE FROM assets WHERE id = ?1", params![id])?;
                deleted.push(asset);
            }
            Ok(deleted)
        })
    }

    /// Remove marked updates and their relation rows. Returns the deleted ids.
    pub fn delete_unused_updates(&self) -> Result<Vec<String>> {
        self.with_immediate_tx(|tx| {
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM updates WHERE marked_for_deletion = 1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            tx.execute(
                "DELETE FROM update_assets WHERE update_id IN \
                 (SELECT id FROM updates WHERE marked_for_deletion = 1)",
                [],
            )?;
            tx.execute("DELETE FROM updates WHERE marked_for_deletion = 1", [])?;
            Ok(ids)
        })
    }

    /// Every file path the catalog currently points at.
    pub(crate) fn known_local_paths(&self) -> Result<HashSet<PathBuf>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT local_path FROM assets WHERE local_path IS NOT NULL")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|path| path.map(PathBuf::from))
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(paths)
    }
}
