//! Loaders populate the catalog from a manifest source.
//!
//! The remote and embedded loaders differ only in where the manifest and the
//! asset bytes come from; both hand the parsed manifest to a [`Reconciler`],
//! which records the update, reuses assets already on disk, fetches the rest
//! through a bounded worker pool, and links everything in one transaction.

use std::{
    path::PathBuf,
    sync::{mpsc, Mutex, PoisonError},
    thread,
};

use ota_domain::{Asset, Manifest, Update, UpdateStatus};
use tracing::{debug, info, warn};

use crate::{
    catalog::Catalog,
    error::{Result, UpdatesError},
};

pub mod embedded;
pub mod remote;

pub use embedded::{EmbeddedBundle, EmbeddedLoader, EMBEDDED_MANIFEST_FILENAME};
pub use remote::RemoteLoader;

/// Result of a successful loader run.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    /// The update was recorded and promoted during this run.
    Loaded(Update),
    /// The catalog already held a launchable copy of the update.
    AlreadyPresent(Update),
    /// The caller declined the update before any asset was fetched.
    Skipped(Update),
}

impl LoadOutcome {
    #[must_use]
    pub fn update(&self) -> &Update {
        match self {
            Self::Loaded(update) | Self::AlreadyPresent(update) | Self::Skipped(update) => update,
        }
    }
}

pub trait Loader {
    /// Run one load against `catalog`, completing exactly once.
    fn load(&self, catalog: &Catalog) -> Result<LoadOutcome>;
}

/// Obtains the bytes of one asset at `dest`, verifying its digest.
pub(crate) trait AssetFetcher: Sync {
    fn fetch(&self, asset: &Asset, dest: &std::path::Path) -> Result<u64>;
}

/// Shared catalog bookkeeping for every loader.
pub(crate) struct Reconciler<'a> {
    catalog: &'a Catalog,
    parallelism: usize,
}

struct FetchJob {
    index: usize,
    asset: Asset,
    dest: PathBuf,
}

impl<'a> Reconciler<'a> {
    pub(crate) fn new(catalog: &'a Catalog, parallelism: usize) -> Self {
        Self {
            catalog,
            parallelism: parallelism.max(1),
        }
    }

    /// Launchable copy of the update if the catalog already has one.
    pub(crate) fn existing_launchable(&self, update_id: &str) -> Result<Option<Update>> {
        Ok(self
            .catalog
            .update_by_id(update_id)?
            .filter(|update| update.status.is_launchable()))
    }

    /// Record `manifest` with `status` as its eventual launchable state and
    /// bring every asset onto disk.
    pub(crate) fn reconcile(
        &self,
        manifest: Manifest,
        status: UpdateStatus,
        fetcher: &dyn AssetFetcher,
    ) -> Result<LoadOutcome> {
        let Manifest { mut update, assets } = manifest;
        if let Some(existing) = self.existing_launchable(&update.id)? {
            debug!(update = %existing.id, "update already launchable");
            return Ok(LoadOutcome::AlreadyPresent(existing));
        }

        update.status = status;
        if self.catalog.update_by_id(&update.id)?.is_none() {
            match self.catalog.add_update(&update) {
                Ok(()) => {}
                Err(UpdatesError::DuplicateId(_)) => {
                    if let Some(existing) = self.existing_launchable(&update.id)? {
                        return Ok(LoadOutcome::AlreadyPresent(existing));
                    }
                }
                Err(err) => return Err(err),
            }
        } else {
            debug!(update = %update.id, "resuming pending update");
        }

        let mut resolved: Vec<Asset> = Vec::with_capacity(assets.len());
        let mut jobs = Vec::new();
        for (index, asset) in assets.into_iter().enumerate() {
            match self.reusable_path(&asset)? {
                Some(path) => resolved.push(asset.with_local_path(path)),
                None => {
                    let dest = self.catalog.asset_path(&asset);
                    jobs.push(FetchJob {
                        index,
                        asset: asset.clone(),
                        dest,
                    });
                    resolved.push(asset);
                }
            }
        }
        let reused = resolved.len() - jobs.len();

        let mut first_error = None;
        let mut fetched = 0usize;
        for (job, outcome) in self.fetch_all(jobs, fetcher) {
            match outcome {
                Ok(_) => {
                    fetched += 1;
                    resolved[job.index].local_path = Some(job.dest);
                }
                Err(err) => {
                    warn!(update = %update.id, key = %job.asset.key, %err, "asset fetch failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        // Assets that failed are linked without a path, which keeps the update pending.
        if let Some(err) = first_error {
            if let Err(link_err) = self.catalog.add_assets(&resolved, &update.id) {
                warn!(update = %update.id, %link_err, "failed to record partial download");
            }
            return Err(err);
        }

        let mut status = self.catalog.add_assets(&resolved, &update.id)?;
        if !status.is_launchable() {
            status = self.catalog.mark_ready(&update.id)?;
        }
        update.status = status;
        info!(update = %update.id, reused, fetched, status = status.as_str(), "update loaded");
        Ok(LoadOutcome::Loaded(update))
    }

    /// Path of an already stored copy of `asset`, if one exists on disk.
    fn reusable_path(&self, asset: &Asset) -> Result<Option<PathBuf>> {
        let Some(existing) = self.catalog.asset_by_key(&asset.key, asset.hash_type)? else {
            return Ok(None);
        };
        if !existing.content_hash.eq_ignore_ascii_case(&asset.content_hash) {
            return Err(UpdatesError::AssetConflict {
                key: asset.key.clone(),
                hash_type: asset.hash_type.as_str(),
                existing: existing.content_hash,
                incoming: asset.content_hash.clone(),
            });
        }
        Ok(existing.local_path.filter(|path| path.is_file()))
    }

    fn fetch_all(
        &self,
        jobs: Vec<FetchJob>,
        fetcher: &dyn AssetFetcher,
    ) -> Vec<(FetchJob, Result<u64>)> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let worker_count = self.parallelism.min(jobs.len());
        let (job_tx, job_rx) = mpsc::channel();
        for job in jobs {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let job_rx = Mutex::new(job_rx);
        let (result_tx, result_rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0..worker_count {
                let job_rx = &job_rx;
                let result_tx = result_tx.clone();
                scope.spawn(move || loop {
                    let job: FetchJob = {
                        let guard = job_rx.lock().unwrap_or_else(PoisonError::into_inner);
                        match guard.recv() {
                            Ok(job) => job,
                            Err(_) => break,
                        }
                    };
                    let outcome = fetcher.fetch(&job.asset, &job.dest);
                    if result_tx.send((job, outcome)).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);
            result_rx.iter().collect()
        })
    }
}
