//! Turns the selected update into a launchable bundle path and asset map.

use std::{
    collections::BTreeMap,
    path::PathBuf,
};

use ota_domain::{Asset, SelectionPolicy, Update};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    catalog::Catalog,
    error::{Result, UpdatesError},
    loader::EmbeddedBundle,
};

/// Everything the host needs to run one update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LaunchedApp {
    pub update: Update,
    pub launch_asset_path: PathBuf,
    /// Asset key to the file on disk, for every asset of the update.
    pub asset_files: BTreeMap<String, PathBuf>,
}

#[derive(Clone, Debug)]
pub struct Launcher {
    catalog: Catalog,
    embedded: Option<EmbeddedBundle>,
}

impl Launcher {
    pub fn new(catalog: Catalog, embedded: Option<EmbeddedBundle>) -> Self {
        Self { catalog, embedded }
    }

    /// Pick an update with `policy` and resolve its files.
    ///
    /// An update whose files cannot be resolved is dropped from the candidate
    /// set and the policy chooses again.
    pub fn launch_update(&self, policy: &dyn SelectionPolicy) -> Result<LaunchedApp> {
        let mut candidates = self.catalog.launchable_updates()?;
        let total = candidates.len();
        let mut rejected = Vec::new();
        loop {
            let Some(update) = policy.launchable_update(&candidates).cloned() else {
                let mut reason = format!(
                    "none of {total} launchable updates is compatible with this binary"
                );
                if !rejected.is_empty() {
                    reason = format!("{reason}; rejected: {}", rejected.join("; "));
                }
                return Err(UpdatesError::NoLaunchableUpdate(reason));
            };
            debug!(update = %update.id, candidates = candidates.len(), "update selected");
            match self.resolve(update.clone()) {
                Err(UpdatesError::NoLaunchableUpdate(reason)) => {
                    warn!(update = %update.id, %reason, "update unusable; choosing again");
                    candidates.retain(|candidate| candidate.id != update.id);
                    rejected.push(reason);
                }
                other => return other,
            }
        }
    }

    /// Resolve every asset of `update` to an existing file.
    pub fn resolve(&self, update: Update) -> Result<LaunchedApp> {
        let assets = self.catalog.assets_for_update(&update.id)?;
        let mut asset_files = BTreeMap::new();
        let mut launch_asset_path = None;
        for asset in assets {
            let path = self.ensure_present(&update, &asset)?;
            if asset.is_launch_asset {
                launch_asset_path = Some(path.clone());
            }
            asset_files.insert(asset.key, path);
        }
        let Some(launch_asset_path) = launch_asset_path else {
            return Err(UpdatesError::NoLaunchableUpdate(format!(
                "update {} has no launch asset",
                update.id
            )));
        };
        info!(update = %update.id, assets = asset_files.len(), "update resolved for launch");
        Ok(LaunchedApp {
            update,
            launch_asset_path,
            asset_files,
        })
    }

    fn ensure_present(&self, update: &Update, asset: &Asset) -> Result<PathBuf> {
        if let Some(path) = asset.local_path.as_ref().filter(|path| path.is_file()) {
            return Ok(path.clone());
        }
        warn!(update = %update.id, key = %asset.key, "asset file missing; attempting recovery");
        if let Some(path) = self.recover_from_embedded(asset)? {
            return Ok(path);
        }
        Err(UpdatesError::NoLaunchableUpdate(format!(
            "asset {} of update {} is missing on disk",
            asset.key, update.id
        )))
    }

    /// Re-copy a missing asset from the embedded bundle when it ships an
    /// identical file.
    fn recover_from_embedded(&self, asset: &Asset) -> Result<Option<PathBuf>> {
        let Some(bundle) = &self.embedded else {
            return Ok(None);
        };
        let manifest = match bundle.read_manifest() {
            Ok(manifest) => manifest,
            Err(err) => {
                debug!(%err, "embedded bundle unavailable for recovery");
                return Ok(None);
            }
        };
        let Some(shipped) = manifest.assets.iter().find(|candidate| {
            candidate.same_identity(asset)
                && candidate.content_hash.eq_ignore_ascii_case(&asset.content_hash)
        }) else {
            return Ok(None);
        };
        let dest = self.catalog.asset_path(asset);
        if let Err(err) = bundle.copy_asset(shipped, &dest) {
            warn!(key = %asset.key, %err, "embedded recovery failed");
            return Ok(None);
        }
        self.catalog
            .update_asset_local_path(&asset.key, asset.hash_type, &dest)?;
        info!(key = %asset.key, "asset recovered from embedded bundle");
        Ok(Some(dest))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use ota_domain::{NewestCompatible, UpdateStatus};
    use tempfile::tempdir;

    use super::*;
    use crate::loader::{embedded::tests::write_bundle, EmbeddedLoader, Loader};

    fn record(catalog: &Catalog, id: &str, commit_time: i64, compat: &str) -> anyhow::Result<()> {
        let launch_key = format!("{id}.js");
        let bundle = write_bundle(
            &catalog.root().join(format!("src-{id}")),
            id,
            commit_time,
            compat,
            &[(launch_key.as_str(), id), ("logo.png", "logo")],
        )?;
        let mut manifest = bundle.read_manifest()?;
        manifest.update.status = UpdateStatus::Ready;
        catalog.add_update(&manifest.update)?;
        let mut assets = Vec::new();
        for asset in manifest.assets {
            let dest = catalog.asset_path(&asset);
            bundle.copy_asset(&asset, &dest)?;
            assets.push(asset.with_local_path(dest));
        }
        catalog.add_assets(&assets, id)?;
        Ok(())
    }

    #[test]
    fn launches_newest_compatible_update() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let catalog = Catalog::open(temp.path())?;
        record(&catalog, "old", 10, "1")?;
        record(&catalog, "new", 20, "1")?;
        record(&catalog, "other-binary", 30, "2")?;

        let launcher = Launcher::new(catalog, None);
        let launched = launcher.launch_update(&NewestCompatible::new("1"))?;
        assert_eq!(launched.update.id, "new");
        assert_eq!(fs::read_to_string(&launched.launch_asset_path)?, "new");
        assert_eq!(
            launched.asset_files.keys().collect::<Vec<_>>(),
            ["logo.png", "new.js"]
        );
        assert_eq!(launcher.launch_update(&NewestCompatible::new("1"))?, launched);
        Ok(())
    }

    #[test]
    fn no_compatible_update_is_an_error() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let catalog = Catalog::open(temp.path())?;
        record(&catalog, "u1", 10, "1")?;
        let err = Launcher::new(catalog, None)
            .launch_update(&NewestCompatible::new("9"))
            .unwrap_err();
        assert!(matches!(err, UpdatesError::NoLaunchableUpdate(_)));
        Ok(())
    }

    #[test]
    fn missing_file_without_fallback_fails() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let catalog = Catalog::open(temp.path())?;
        record(&catalog, "u1", 10, "1")?;
        let launch = catalog.launch_asset_for_update("u1")?.expect("launch");
        fs::remove_file(launch.local_path.expect("path"))?;

        let err = Launcher::new(catalog, None)
            .launch_update(&NewestCompatible::new("1"))
            .unwrap_err();
        assert!(matches!(err, UpdatesError::NoLaunchableUpdate(ref reason) if reason.contains("u1.js")));
        Ok(())
    }

    #[test]
    fn broken_newest_update_falls_back_to_older_one() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let catalog = Catalog::open(temp.path())?;
        record(&catalog, "old", 10, "1")?;
        record(&catalog, "new", 20, "1")?;
        let launch = catalog.launch_asset_for_update("new")?.expect("launch");
        fs::remove_file(launch.local_path.expect("path"))?;

        let launched = Launcher::new(catalog, None).launch_update(&NewestCompatible::new("1"))?;
        assert_eq!(launched.update.id, "old");
        assert_eq!(fs::read_to_string(&launched.launch_asset_path)?, "old");
        Ok(())
    }

    #[test]
    fn missing_file_is_recovered_from_embedded_bundle() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let catalog = Catalog::open(temp.path().join("store"))?;
        let bundle = write_bundle(
            &temp.path().join("embedded"),
            "e1",
            0,
            "1",
            &[("index.js", "embedded"), ("logo.png", "logo")],
        )?;
        EmbeddedLoader::new(bundle.clone()).load(&catalog)?;
        let launch = catalog.launch_asset_for_update("e1")?.expect("launch");
        let path = launch.local_path.expect("path");
        fs::remove_file(&path)?;

        let launched = Launcher::new(catalog.clone(), Some(bundle))
            .launch_update(&NewestCompatible::new("1"))?;
        assert_eq!(launched.update.id, "e1");
        assert_eq!(fs::read_to_string(&launched.launch_asset_path)?, "embedded");
        assert!(path.is_file());
        Ok(())
    }
}
