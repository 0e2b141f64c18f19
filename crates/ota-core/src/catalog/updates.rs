use std::path::Path;

use ota_domain::{Update, UpdateStatus};
use rusqlite::{params, OptionalExtension, Transaction};
use serde_json::Value;
use tracing::{debug, info};

use super::{parse_status, timestamp_secs, update_from_row, Catalog, UpdateEntry, UPDATE_COLUMNS};
use crate::error::{Result, UpdatesError};

/// Why an update cannot be promoted yet.
pub(super) struct Completeness {
    pub(super) missing: Vec<String>,
    pub(super) launch_assets: usize,
}

impl Completeness {
    pub(super) fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.launch_assets == 1
    }
}

impl Catalog {
    /// Record a new update as `pending`.
    ///
    /// An update passed with status `embedded` is remembered as coming from the
    /// embedded bundle and is promoted to `embedded` rather than `ready`.
    pub fn add_update(&self, update: &Update) -> Result<()> {
        self.with_immediate_tx(|tx| {
            if update_exists(tx, &update.id)? {
                return Err(UpdatesError::DuplicateId(update.id.clone()));
            }
            tx.execute(
                "INSERT INTO updates \
                 (id, commit_time, binary_compatibility, metadata, status, raw_manifest, embedded, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    update.id,
                    update.commit_time,
                    update.binary_compatibility,
                    Value::Object(update.metadata.clone()).to_string(),
                    UpdateStatus::Pending.as_str(),
                    update.raw_manifest,
                    update.status == UpdateStatus::Embedded,
                    timestamp_secs(),
                ],
            )?;
            debug!(update = %update.id, commit_time = update.commit_time, "update recorded");
            Ok(())
        })
    }

    /// Promote a pending update whose assets are all present.
    ///
    /// Returns the resulting status; an already launchable update is left as is.
    pub fn mark_ready(&self, update_id: &str) -> Result<UpdateStatus> {
        self.with_immediate_tx(|tx| {
            let Some((status, _)) = status_row(tx, update_id)? else {
                return Err(UpdatesError::UnknownUpdate(update_id.to_string()));
            };
            if status.is_launchable() {
                return Ok(status);
            }
            let completeness = completeness(tx, update_id)?;
            if !completeness.is_complete() {
                return Err(UpdatesError::IncompleteAssets {
                    update_id: update_id.to_string(),
                    missing: completeness.missing,
                    launch_assets: completeness.launch_assets,
                });
            }
            promote(tx, update_id)
        })
    }

    pub fn update_by_id(&self, update_id: &str) -> Result<Option<Update>> {
        let conn = self.connection()?;
        let update = conn
            .query_row(
                &format!("SELECT {UPDATE_COLUMNS} FROM updates u WHERE u.id = ?1"),
                params![update_id],
                update_from_row,
            )
            .optional()?;
        Ok(update)
    }

    /// Updates eligible for launch: ready or embedded, not marked for
    /// deletion, newest first with ties broken by id.
    pub fn launchable_updates(&self) -> Result<Vec<Update>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPDATE_COLUMNS} FROM updates u \
             WHERE u.status IN ('ready', 'embedded') AND u.marked_for_deletion = 0 \
             ORDER BY u.commit_time DESC, u.id ASC"
        ))?;
        let updates = stmt
            .query_map([], update_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(updates)
    }

    /// Every recorded update, including pending and marked ones.
    pub fn all_updates(&self) -> Result<Vec<UpdateEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPDATE_COLUMNS}, u.marked_for_deletion, \
             (SELECT COUNT(*) FROM update_assets ua WHERE ua.update_id = u.id) \
             FROM updates u ORDER BY u.commit_time DESC, u.id ASC"
        ))?;
        let entries = stmt
            .query_map([], |row| {
                Ok(UpdateEntry {
                    update: update_from_row(row)?,
                    marked_for_deletion: row.get(6)?,
                    asset_count: usize::try_from(row.get::<_, i64>(7)?).unwrap_or(0),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

pub(super) fn update_exists(tx: &Transaction<'_>, update_id: &str) -> Result<bool> {
    let exists = tx
        .query_row(
            "SELECT 1 FROM updates WHERE id = ?1",
            params![update_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

fn status_row(tx: &Transaction<'_>, update_id: &str) -> Result<Option<(UpdateStatus, bool)>> {
    let row = tx
        .query_row(
            "SELECT status, embedded FROM updates WHERE id = ?1",
            params![update_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
        )
        .optional()?;
    match row {
        Some((status, embedded)) => Ok(Some((parse_status(&status)?, embedded))),
        None => Ok(None),
    }
}

/// Inspect the linked assets of an update: keys whose file is missing and the
/// number of launch assets.
pub(super) fn completeness(tx: &Transaction<'_>, update_id: &str) -> Result<Completeness> {
    let mut stmt = tx.prepare(
        "SELECT a.key, a.local_path, ua.is_launch_asset \
         FROM update_assets ua JOIN assets a ON a.id = ua.asset_id \
         WHERE ua.update_id = ?1 ORDER BY a.key",
    )?;
    let rows = stmt
        .query_map(params![update_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut result = Completeness {
        missing: Vec::new(),
        launch_assets: 0,
    };
    for (key, local_path, is_launch_asset) in rows {
        if is_launch_asset {
            result.launch_assets += 1;
        }
        let present = local_path.is_some_and(|path| Path::new(&path).is_file());
        if !present {
            result.missing.push(key);
        }
    }
    Ok(result)
}

/// Promote a pending update when complete; returns the new status if it moved.
pub(super) fn promote_if_complete(
    tx: &Transaction<'_>,
    update_id: &str,
) -> Result<Option<UpdateStatus>> {
    let Some((status, _)) = status_row(tx, update_id)? else {
        return Err(UpdatesError::UnknownUpdate(update_id.to_string()));
    };
    if status != UpdateStatus::Pending {
        return Ok(None);
    }
    if !completeness(tx, update_id)?.is_complete() {
        return Ok(None);
    }
    promote(tx, update_id).map(Some)
}

fn promote(tx: &Transaction<'_>, update_id: &str) -> Result<UpdateStatus> {
    let Some((_, embedded)) = status_row(tx, update_id)? else {
        return Err(UpdatesError::UnknownUpdate(update_id.to_string()));
    };
    let status = if embedded {
        UpdateStatus::Embedded
    } else {
        UpdateStatus::Ready
    };
    tx.execute(
        "UPDATE updates SET status = ?2 WHERE id = ?1",
        params![update_id, status.as_str()],
    )?;
    info!(update = %update_id, status = status.as_str(), "update promoted");
    Ok(status)
}
