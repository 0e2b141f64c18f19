use std::{
    fs,
    path::Path,
    sync::Arc,
    thread,
};

use ota_domain::{Asset, Manifest, ManifestError, Update, UpdateStatus};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

use super::{AssetFetcher, LoadOutcome, Loader, Reconciler};
use crate::{
    catalog::Catalog,
    config::{DownloadConfig, RetryPolicy},
    effects::RemoteSource,
    error::{Result, UpdatesError},
    hashing::{ensure_digest, HashingWriter},
};

/// Loads updates published by a [`RemoteSource`].
#[derive(Clone)]
pub struct RemoteLoader {
    source: Arc<dyn RemoteSource>,
    download: DownloadConfig,
}

impl RemoteLoader {
    pub fn new(source: Arc<dyn RemoteSource>, download: DownloadConfig) -> Self {
        Self { source, download }
    }

    /// Fetch and parse the current manifest without touching the catalog.
    pub fn check(&self) -> Result<Manifest> {
        let raw = self
            .source
            .fetch_manifest()
            .map_err(|err| UpdatesError::network(self.source.describe(), &err))?;
        let manifest = Manifest::parse(&raw)?;
        debug!(
            update = %manifest.update.id,
            commit_time = manifest.update.commit_time,
            source = %self.source.describe(),
            "manifest fetched"
        );
        Ok(manifest)
    }

    /// Load the current manifest, letting `should_fetch` veto the update after
    /// it is parsed and before any asset is requested.
    pub fn load_with<F>(&self, catalog: &Catalog, should_fetch: F) -> Result<LoadOutcome>
    where
        F: FnOnce(&Update) -> bool,
    {
        let manifest = self.check()?;
        let reconciler = Reconciler::new(catalog, self.download.parallelism);
        if let Some(existing) = reconciler.existing_launchable(&manifest.update.id)? {
            return Ok(LoadOutcome::AlreadyPresent(existing));
        }
        if !should_fetch(&manifest.update) {
            info!(update = %manifest.update.id, "remote update declined before download");
            return Ok(LoadOutcome::Skipped(manifest.update));
        }
        let fetcher = RemoteFetcher {
            source: self.source.as_ref(),
            retry: self.download.retry,
        };
        reconciler.reconcile(manifest, UpdateStatus::Ready, &fetcher)
    }
}

impl Loader for RemoteLoader {
    fn load(&self, catalog: &Catalog) -> Result<LoadOutcome> {
        self.load_with(catalog, |_| true)
    }
}

struct RemoteFetcher<'a> {
    source: &'a dyn RemoteSource,
    retry: RetryPolicy,
}

impl AssetFetcher for RemoteFetcher<'_> {
    fn fetch(&self, asset: &Asset, dest: &Path) -> Result<u64> {
        let url = asset
            .url
            .as_ref()
            .ok_or(UpdatesError::ManifestParse(ManifestError::MissingField("url")))?;
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match download_once(self.source, url, asset, dest) {
                Ok(size) => return Ok(size),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    debug!(key = %asset.key, attempt, %err, "retrying asset download");
                    thread::sleep(self.retry.backoff * u32::try_from(attempt).unwrap_or(u32::MAX));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn download_once(source: &dyn RemoteSource, url: &Url, asset: &Asset, dest: &Path) -> Result<u64> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| UpdatesError::io(parent, err))?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| UpdatesError::io(parent, err))?;

    let mut writer = HashingWriter::new(&mut tmp, asset.hash_type);
    source
        .fetch_asset(url, &mut writer)
        .map_err(|err| UpdatesError::network(url.as_str(), &err))?;
    let (actual, written) = writer.finish().map_err(|err| UpdatesError::io(dest, err))?;
    ensure_digest(asset, &actual)?;

    tmp.persist(dest)
        .map_err(|err| UpdatesError::io(dest, err.error))?;
    debug!(key = %asset.key, bytes = written, "asset downloaded");
    Ok(written)
}
