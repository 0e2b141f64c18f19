#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod catalog;
pub mod config;
pub mod controller;
pub mod effects;
pub mod error;
pub mod hashing;
pub mod launcher;
pub mod loader;
pub mod reaper;

pub use ota_domain::{
    Asset, HashType, Manifest, ManifestError, NewestCompatible, PinnedUpdate, SelectionPolicy,
    Update, UpdateStatus,
};

pub use catalog::{Catalog, UpdateEntry};
pub use config::{default_root, DownloadConfig, EnvOverrides, RetryPolicy, UpdatesConfig};
pub use controller::{ControllerBuilder, ControllerState, UpdatesController};
pub use effects::{
    http_client, ErrorReport, HostRuntime, HttpRemoteSource, RemoteSource, TracingHost,
    UpdatesEvent,
};
pub use error::{Result, UpdatesError};
pub use launcher::{LaunchedApp, Launcher};
pub use loader::{
    EmbeddedBundle, EmbeddedLoader, LoadOutcome, Loader, RemoteLoader, EMBEDDED_MANIFEST_FILENAME,
};
pub use reaper::{reap_unused_updates, GcSummary};
