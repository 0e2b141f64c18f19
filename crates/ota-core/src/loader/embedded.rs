use std::{
    fs::{self, File},
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};

use ota_domain::{Asset, Manifest, UpdateStatus};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{AssetFetcher, LoadOutcome, Loader, Reconciler};
use crate::{
    catalog::Catalog,
    error::{Result, UpdatesError},
    hashing::{ensure_digest, HashingWriter},
};

pub const EMBEDDED_MANIFEST_FILENAME: &str = "app.manifest.json";

/// The update shipped inside the binary: a directory holding
/// `app.manifest.json` and the files it names.
#[derive(Clone, Debug)]
pub struct EmbeddedBundle {
    dir: PathBuf,
}

impl EmbeddedBundle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_manifest(&self) -> Result<Manifest> {
        let path = self.dir.join(EMBEDDED_MANIFEST_FILENAME);
        let raw = fs::read_to_string(&path).map_err(|err| UpdatesError::io(&path, err))?;
        Ok(Manifest::parse(&raw)?)
    }

    /// Location of an asset's file inside the bundle. Paths that would leave
    /// the bundle directory are rejected.
    pub fn source_path(&self, asset: &Asset) -> Result<PathBuf> {
        let relative = Path::new(asset.embedded_path.as_deref().unwrap_or(&asset.key));
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !contained || relative.as_os_str().is_empty() {
            return Err(UpdatesError::io(
                relative,
                io::Error::new(ErrorKind::InvalidInput, "embedded asset path escapes the bundle"),
            ));
        }
        Ok(self.dir.join(relative))
    }

    /// Copy an asset out of the bundle to `dest`, verifying its digest.
    pub fn copy_asset(&self, asset: &Asset, dest: &Path) -> Result<u64> {
        let source = self.source_path(asset)?;
        let mut reader = File::open(&source).map_err(|err| UpdatesError::io(&source, err))?;
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|err| UpdatesError::io(parent, err))?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(|err| UpdatesError::io(parent, err))?;

        let mut writer = HashingWriter::new(&mut tmp, asset.hash_type);
        io::copy(&mut reader, &mut writer).map_err(|err| UpdatesError::io(&source, err))?;
        let (actual, written) = writer.finish().map_err(|err| UpdatesError::io(dest, err))?;
        ensure_digest(asset, &actual)?;

        tmp.persist(dest)
            .map_err(|err| UpdatesError::io(dest, err.error))?;
        debug!(key = %asset.key, bytes = written, "asset copied from embedded bundle");
        Ok(written)
    }
}

impl AssetFetcher for EmbeddedBundle {
    fn fetch(&self, asset: &Asset, dest: &Path) -> Result<u64> {
        self.copy_asset(asset, dest)
    }
}

/// Records the embedded update so a first launch works offline.
#[derive(Clone, Debug)]
pub struct EmbeddedLoader {
    bundle: EmbeddedBundle,
}

impl EmbeddedLoader {
    pub fn new(bundle: EmbeddedBundle) -> Self {
        Self { bundle }
    }
}

impl Loader for EmbeddedLoader {
    fn load(&self, catalog: &Catalog) -> Result<LoadOutcome> {
        let manifest = self.bundle.read_manifest()?;
        Reconciler::new(catalog, 1).reconcile(manifest, UpdateStatus::Embedded, &self.bundle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use ota_domain::HashType;
    use tempfile::tempdir;

    use super::*;
    use crate::hashing::digest_bytes;

    /// Write a bundle directory whose first file is the launch asset.
    pub(crate) fn write_bundle(
        dir: &Path,
        id: &str,
        commit_time: i64,
        compatibility: &str,
        files: &[(&str, &str)],
    ) -> anyhow::Result<EmbeddedBundle> {
        fs::create_dir_all(dir)?;
        let mut assets = Vec::new();
        for (index, (key, contents)) in files.iter().enumerate() {
            let file_name = format!("embedded-{index}-{}", key.replace('/', "_"));
            fs::write(dir.join(&file_name), contents)?;
            assets.push(format!(
                r#"{{"key":"{key}","hashType":"sha256","contentHash":"{}","isLaunchAsset":{},"embeddedPath":"{file_name}"}}"#,
                digest_bytes(HashType::Sha256, contents.as_bytes()),
                index == 0
            ));
        }
        let manifest = format!(
            r#"{{"id":"{id}","commitTime":{commit_time},"binaryCompatibility":"{compatibility}","assets":[{}]}}"#,
            assets.join(",")
        );
        fs::write(dir.join(EMBEDDED_MANIFEST_FILENAME), manifest)?;
        Ok(EmbeddedBundle::new(dir))
    }

    #[test]
    fn records_embedded_update_once() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let bundle = write_bundle(
            &temp.path().join("bundle"),
            "e1",
            0,
            "1",
            &[("index.js", "embedded bundle"), ("logo.png", "logo")],
        )?;
        let catalog = Catalog::open(temp.path().join("store"))?;
        let loader = EmbeddedLoader::new(bundle);

        let outcome = loader.load(&catalog)?;
        assert!(matches!(outcome, LoadOutcome::Loaded(ref update) if update.status == UpdateStatus::Embedded));
        let launch = catalog.launch_asset_for_update("e1")?.expect("launch asset");
        let path = launch.local_path.expect("copied");
        assert!(catalog.owns_path(&path));
        assert_eq!(fs::read_to_string(path)?, "embedded bundle");

        assert!(matches!(loader.load(&catalog)?, LoadOutcome::AlreadyPresent(_)));
        Ok(())
    }

    #[test]
    fn corrupted_bundle_file_is_rejected() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dir = temp.path().join("bundle");
        let bundle = write_bundle(&dir, "e1", 0, "1", &[("index.js", "original")])?;
        fs::write(dir.join("embedded-0-index.js"), "tampered")?;
        let catalog = Catalog::open(temp.path().join("store"))?;

        let err = EmbeddedLoader::new(bundle).load(&catalog).unwrap_err();
        assert!(matches!(err, UpdatesError::HashMismatch { .. }), "{err}");
        assert!(catalog.launchable_updates()?.is_empty());
        Ok(())
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let bundle = EmbeddedBundle::new("/bundle");
        let asset = Asset::new("index.js", HashType::Sha1, "00".repeat(20))
            .with_embedded_path("../secrets");
        assert!(bundle.source_path(&asset).is_err());
        let plain = Asset::new("assets/index.js", HashType::Sha1, "00".repeat(20));
        assert_eq!(
            bundle.source_path(&plain).expect("contained"),
            Path::new("/bundle/assets/index.js")
        );
    }

    #[test]
    fn missing_manifest_is_an_io_error() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let err = EmbeddedBundle::new(temp.path()).read_manifest().unwrap_err();
        assert!(matches!(err, UpdatesError::Io { .. }));
        Ok(())
    }
}
