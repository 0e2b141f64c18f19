//! Reclaims disk space from superseded updates.
//!
//! The launched update anchors collection: everything older is marked, assets
//! no live update references are deleted row first and file second, and stray
//! files left in the asset tree by interrupted downloads are swept once they
//! are older than a grace window.

use std::{
    fs,
    io::ErrorKind,
    path::Path,
    time::{Duration, SystemTime},
};

use ota_domain::Update;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{catalog::Catalog, error::Result};

const ORPHAN_GRACE: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GcSummary {
    pub updates_marked: usize,
    pub assets_marked: usize,
    pub assets_deleted: usize,
    pub assets_skipped: usize,
    pub updates_deleted: usize,
    pub files_deleted: usize,
    pub orphans_removed: usize,
    pub bytes_reclaimed: u64,
}

/// Run a full collection pass anchored on the launched update. Embedded
/// baselines compatible with `binary_token` are kept as launch fallbacks.
pub fn reap_unused_updates(
    catalog: &Catalog,
    launched: &Update,
    binary_token: &str,
) -> Result<GcSummary> {
    let mut summary = GcSummary::default();

    summary.updates_marked = catalog.mark_for_deletion(&launched.id, binary_token)?.len();
    let marked = catalog.mark_unused_assets_for_deletion()?;
    summary.assets_marked = marked.len();

    let ids: Vec<i64> = marked.iter().filter_map(|asset| asset.row_id).collect();
    let deleted = catalog.delete_assets(&ids)?;
    summary.assets_deleted = deleted.len();
    summary.assets_skipped = ids.len() - deleted.len();

    for asset in &deleted {
        let Some(path) = asset.local_path.as_deref() else {
            continue;
        };
        if !catalog.owns_path(path) {
            debug!(key = %asset.key, path = %path.display(), "asset file outside store; leaving it");
            continue;
        }
        if let Some(bytes) = remove_file(path) {
            summary.files_deleted += 1;
            summary.bytes_reclaimed += bytes;
        }
    }

    summary.updates_deleted = catalog.delete_unused_updates()?.len();

    let (orphans, orphan_bytes) = sweep_orphaned_files(catalog, ORPHAN_GRACE)?;
    summary.orphans_removed = orphans;
    summary.bytes_reclaimed += orphan_bytes;

    info!(
        launched = %launched.id,
        updates_deleted = summary.updates_deleted,
        assets_deleted = summary.assets_deleted,
        bytes_reclaimed = summary.bytes_reclaimed,
        "update reaper finished"
    );
    Ok(summary)
}

/// Remove files in the asset tree that no catalog row points at.
pub(crate) fn sweep_orphaned_files(catalog: &Catalog, grace: Duration) -> Result<(usize, u64)> {
    let assets_root = catalog.assets_dir();
    if !assets_root.exists() {
        return Ok((0, 0));
    }
    let known = catalog.known_local_paths()?;
    let cutoff = SystemTime::now()
        .checked_sub(grace)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0usize;
    let mut reclaimed = 0u64;
    for entry in WalkDir::new(&assets_root).min_depth(3).max_depth(3) {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_file() || known.contains(entry.path()) {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if modified > cutoff {
            continue;
        }
        if let Some(bytes) = remove_file(entry.path()) {
            removed += 1;
            reclaimed += bytes;
        }
    }
    if removed > 0 {
        debug!(removed, reclaimed, "swept orphaned asset files");
    }
    Ok((removed, reclaimed))
}

fn remove_file(path: &Path) -> Option<u64> {
    let size = fs::metadata(path).map(|metadata| metadata.len()).unwrap_or(0);
    match fs::remove_file(path) {
        Ok(()) => Some(size),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to remove asset file");
            None
        }
    }
}
