//! Process-level coordination of launch, background checks, reloads and GC.
//!
//! An [`UpdatesController`] is an explicit context shared through an `Arc`.
//! Startup is synchronous; the remote check runs on one background thread and
//! reports through the [`HostRuntime`]. Loads hold the activity gate shared and
//! GC holds it exclusively.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    thread::{self, JoinHandle},
};

use ota_domain::{NewestCompatible, SelectionPolicy, Update};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    catalog::Catalog,
    config::UpdatesConfig,
    effects::{ErrorReport, HostRuntime, HttpRemoteSource, RemoteSource, TracingHost, UpdatesEvent},
    error::{Result, UpdatesError},
    launcher::{LaunchedApp, Launcher},
    loader::{EmbeddedBundle, EmbeddedLoader, LoadOutcome, Loader, RemoteLoader},
    reaper::{reap_unused_updates, GcSummary},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerState {
    NotStarted,
    Resolving,
    Launched,
}

pub struct ControllerBuilder {
    config: UpdatesConfig,
    policy: Option<Arc<dyn SelectionPolicy>>,
    remote_source: Option<Arc<dyn RemoteSource>>,
    host: Option<Arc<dyn HostRuntime>>,
}

impl ControllerBuilder {
    #[must_use]
    pub fn new(config: UpdatesConfig) -> Self {
        Self {
            config,
            policy: None,
            remote_source: None,
            host: None,
        }
    }

    /// Override the default [`NewestCompatible`] policy.
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Use `source` instead of an HTTP source built from the manifest URL.
    #[must_use]
    pub fn remote_source(mut self, source: Arc<dyn RemoteSource>) -> Self {
        self.remote_source = Some(source);
        self
    }

    #[must_use]
    pub fn host(mut self, host: Arc<dyn HostRuntime>) -> Self {
        self.host = Some(host);
        self
    }

    /// Open the catalog and assemble the controller. A store that cannot be
    /// opened is reported to the host as fatal before the error is returned.
    pub fn build(self) -> Result<Arc<UpdatesController>> {
        let config = self.config;
        let host: Arc<dyn HostRuntime> = match self.host {
            Some(host) => host,
            None => Arc::new(TracingHost),
        };
        let catalog = match Catalog::open(&config.root) {
            Ok(catalog) => catalog,
            Err(err) => {
                report_to(host.as_ref(), &err, true);
                return Err(err);
            }
        };
        let policy: Arc<dyn SelectionPolicy> = match self.policy {
            Some(policy) => policy,
            None => Arc::new(NewestCompatible::new(config.binary_version.clone())),
        };
        let embedded = config.embedded_dir.as_ref().map(EmbeddedBundle::new);

        let source: Option<Arc<dyn RemoteSource>> = match (self.remote_source, &config.manifest_url) {
            _ if !config.online => None,
            (Some(source), _) => Some(source),
            (None, Some(url)) => {
                let source: Arc<dyn RemoteSource> = Arc::new(
                    HttpRemoteSource::new(
                        url.clone(),
                        config.binary_version.clone(),
                        config.download.timeout,
                    )
                    .map_err(|err| UpdatesError::network(url.as_str(), &err))?,
                );
                Some(source)
            }
            (None, None) => None,
        };
        let remote = source.map(|source| RemoteLoader::new(source, config.download));

        debug!(
            root = %catalog.root().display(),
            remote = remote.is_some(),
            embedded = embedded.is_some(),
            "updates controller configured"
        );
        Ok(Arc::new(UpdatesController {
            launcher: Launcher::new(catalog.clone(), embedded.clone()),
            catalog,
            policy,
            embedded,
            remote,
            host,
            config,
            state: Mutex::new(ControllerState::NotStarted),
            launched: RwLock::new(None),
            pending_update: Mutex::new(None),
            last_gc: Mutex::new(None),
            activity: RwLock::new(()),
            background: Mutex::new(None),
        }))
    }
}

pub struct UpdatesController {
    config: UpdatesConfig,
    catalog: Catalog,
    policy: Arc<dyn SelectionPolicy>,
    launcher: Launcher,
    embedded: Option<EmbeddedBundle>,
    remote: Option<RemoteLoader>,
    host: Arc<dyn HostRuntime>,
    state: Mutex<ControllerState>,
    launched: RwLock<Option<Arc<LaunchedApp>>>,
    pending_update: Mutex<Option<Update>>,
    last_gc: Mutex<Option<GcSummary>>,
    activity: RwLock<()>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl UpdatesController {
    #[must_use]
    pub fn config(&self) -> &UpdatesConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        *lock(&self.state)
    }

    #[must_use]
    pub fn launched_app(&self) -> Option<Arc<LaunchedApp>> {
        read(&self.launched).clone()
    }

    /// Update adopted by the last remote run but not launched yet.
    #[must_use]
    pub fn pending_update(&self) -> Option<Update> {
        lock(&self.pending_update).clone()
    }

    #[must_use]
    pub fn last_gc_summary(&self) -> Option<GcSummary> {
        lock(&self.last_gc).clone()
    }

    /// Resolve the update to run, then kick off the remote check or GC.
    ///
    /// A failure here has no fallback and is reported to the host as fatal.
    pub fn start(self: &Arc<Self>) -> Result<Arc<LaunchedApp>> {
        {
            let mut state = lock(&self.state);
            match *state {
                ControllerState::NotStarted => *state = ControllerState::Resolving,
                ControllerState::Launched => {
                    return self
                        .launched_app()
                        .ok_or(UpdatesError::InvalidState("start twice"));
                }
                ControllerState::Resolving => return Err(UpdatesError::InvalidState("start twice")),
            }
        }

        let app = match self.initial_launch() {
            Ok(app) => Arc::new(app),
            Err(err) => {
                *lock(&self.state) = ControllerState::NotStarted;
                self.report(&err, true);
                return Err(err);
            }
        };
        *write(&self.launched) = Some(Arc::clone(&app));
        *lock(&self.state) = ControllerState::Launched;
        info!(update = %app.update.id, "update launched");

        if self.remote.is_some() && self.config.check_on_launch {
            self.spawn_background_check();
        } else {
            self.gc_quietly();
        }
        Ok(app)
    }

    fn initial_launch(&self) -> Result<LaunchedApp> {
        let _gate = read(&self.activity);
        match self.launcher.launch_update(self.policy.as_ref()) {
            Err(UpdatesError::NoLaunchableUpdate(reason)) if self.embedded.is_some() => {
                debug!(%reason, "no usable update in the catalog; recording embedded update");
                if let Some(bundle) = &self.embedded {
                    if let Err(err) = EmbeddedLoader::new(bundle.clone()).load(&self.catalog) {
                        warn!(%err, "embedded update could not be recorded");
                        return Err(UpdatesError::NoLaunchableUpdate(format!(
                            "{reason}; embedded update unavailable: {err}"
                        )));
                    }
                }
                self.launcher.launch_update(self.policy.as_ref())
            }
            other => other,
        }
    }

    fn spawn_background_check(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("ota-remote-check".to_string())
            .spawn(move || {
                // Failures are already reported to the host.
                let _ = controller.fetch_update();
                controller.gc_quietly();
            });
        match spawned {
            Ok(handle) => *lock(&self.background) = Some(handle),
            Err(err) => {
                warn!(%err, "failed to spawn remote check; running GC only");
                self.gc_quietly();
            }
        }
    }

    /// Fetch the remote manifest and report whether the policy would adopt it.
    /// The catalog is not touched.
    pub fn check_for_update(&self) -> Result<Option<Update>> {
        let remote = self.remote()?;
        let manifest = remote.check().inspect_err(|err| self.report(err, false))?;
        let launched = self.launched_app();
        let adopt = self
            .policy
            .should_load_new_update(Some(&manifest.update), launched.as_ref().map(|app| &app.update));
        Ok(adopt.then_some(manifest.update))
    }

    /// Run the remote loader once and act on the result.
    pub fn fetch_update(&self) -> Result<LoadOutcome> {
        let remote = self.remote()?;
        let launched = self.launched_app();
        let launched_update = launched.as_ref().map(|app| &app.update);
        let outcome = {
            let _gate = read(&self.activity);
            remote.load_with(&self.catalog, |candidate| {
                self.policy.should_load_new_update(Some(candidate), launched_update)
            })
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.host.emit(&UpdatesEvent::Error {
                    message: err.to_string(),
                });
                self.report(&err, false);
                return Err(err);
            }
        };

        let adopted = match &outcome {
            LoadOutcome::Loaded(update) | LoadOutcome::AlreadyPresent(update) => self
                .policy
                .should_load_new_update(Some(update), launched_update)
                .then(|| update.clone()),
            LoadOutcome::Skipped(_) => None,
        };
        match adopted {
            Some(update) => {
                info!(update = %update.id, "new update available");
                *lock(&self.pending_update) = Some(update.clone());
                self.host.emit(&UpdatesEvent::UpdateAvailable {
                    update_id: update.id,
                    manifest: update.raw_manifest,
                });
                if self.config.reload_on_update {
                    // Failures are already reported to the host.
                    let _ = self.reload();
                }
            }
            None => {
                debug!(update = %outcome.update().id, "remote update not adopted");
                self.host.emit(&UpdatesEvent::NoUpdateAvailable);
            }
        }
        Ok(outcome)
    }

    /// Re-launch against the current catalog and ask the host to reload.
    /// The previous launch stays in place on failure.
    pub fn reload(&self) -> Result<Arc<LaunchedApp>> {
        if self.state() != ControllerState::Launched {
            return Err(UpdatesError::InvalidState("reload before start"));
        }
        let relaunched = {
            let _gate = read(&self.activity);
            self.launcher.launch_update(self.policy.as_ref())
        };
        let app = match relaunched {
            Ok(app) => Arc::new(app),
            Err(err) => {
                self.report(&err, false);
                return Err(err);
            }
        };
        *write(&self.launched) = Some(Arc::clone(&app));
        {
            let mut pending = lock(&self.pending_update);
            if pending.as_ref().is_some_and(|update| update.id == app.update.id) {
                *pending = None;
            }
        }
        info!(update = %app.update.id, "update relaunched");
        self.host.request_reload();
        Ok(app)
    }

    /// Collect everything the launched update no longer needs.
    pub fn run_gc(&self) -> Result<GcSummary> {
        let Some(app) = self.launched_app() else {
            return Err(UpdatesError::InvalidState("collect garbage before launch"));
        };
        let _gate = write(&self.activity);
        let summary = reap_unused_updates(&self.catalog, &app.update, &self.config.binary_version)?;
        *lock(&self.last_gc) = Some(summary.clone());
        Ok(summary)
    }

    /// Wait for the background check to finish.
    pub fn shutdown(&self) {
        let handle = lock(&self.background).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("remote check thread panicked");
            }
        }
    }

    fn remote(&self) -> Result<&RemoteLoader> {
        self.remote
            .as_ref()
            .ok_or(UpdatesError::InvalidState("check for updates without a remote source"))
    }

    fn gc_quietly(&self) {
        if let Err(err) = self.run_gc() {
            warn!(%err, "update GC failed");
        }
    }

    fn report(&self, err: &UpdatesError, fatal: bool) {
        report_to(self.host.as_ref(), err, fatal);
    }
}

fn report_to(host: &dyn HostRuntime, err: &UpdatesError, fatal: bool) {
    host.report_error(&ErrorReport {
        domain: err.domain(),
        description: err.to_string(),
        fatal,
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
