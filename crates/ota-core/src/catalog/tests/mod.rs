//! Catalog unit tests, split by topic.

use super::*;
use crate::hashing::digest_bytes;
use anyhow::Result;
use serde_json::json;
use tempfile::{tempdir, TempDir};

mod assets;
mod basics;

const BINARY: &str = "1.0";

fn new_catalog() -> Result<(TempDir, Catalog)> {
    let temp = tempdir()?;
    let catalog = Catalog::open(temp.path().join("store"))?;
    Ok((temp, catalog))
}

fn update(id: &str, commit_time: i64) -> Update {
    let mut metadata = Map::new();
    metadata.insert("channel".to_string(), json!("default"));
    Update {
        id: id.to_string(),
        commit_time,
        binary_compatibility: BINARY.to_string(),
        metadata,
        status: UpdateStatus::Pending,
        raw_manifest: format!("{{\"id\":\"{id}\"}}"),
    }
}

/// Describe an asset without writing its file.
fn declared(key: &str, contents: &[u8]) -> Asset {
    Asset::new(key, HashType::Sha1, digest_bytes(HashType::Sha1, contents))
}

/// Write an asset's file into the store and describe it with its local path.
fn stored(catalog: &Catalog, key: &str, contents: &[u8]) -> Result<Asset> {
    let asset = declared(key, contents);
    let path = catalog.asset_path(&asset);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents)?;
    Ok(asset.with_local_path(path))
}

/// Record an update with a launch bundle plus the given extra assets, all present.
fn ready_update(catalog: &Catalog, id: &str, commit_time: i64, extra: &[&str]) -> Result<Vec<Asset>> {
    catalog.add_update(&update(id, commit_time))?;
    let mut assets = vec![stored(catalog, &format!("{id}.bundle.js"), id.as_bytes())?.launch()];
    for key in extra {
        assets.push(stored(catalog, key, key.as_bytes())?);
    }
    let status = catalog.add_assets(&assets, id)?;
    assert_eq!(status, UpdateStatus::Ready);
    Ok(assets)
}
