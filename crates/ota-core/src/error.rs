use std::{io, path::PathBuf};

use ota_domain::ManifestError;

pub mod codes {
    pub const NETWORK: &str = "OTA100";
    pub const MANIFEST_PARSE: &str = "OTA110";
    pub const HASH_MISMATCH: &str = "OTA120";
    pub const DUPLICATE_ID: &str = "OTA200";
    pub const INCOMPLETE_ASSETS: &str = "OTA201";
    pub const UNKNOWN_ENTRY: &str = "OTA202";
    pub const ASSET_CONFLICT: &str = "OTA203";
    pub const STORE_UNAVAILABLE: &str = "OTA300";
    pub const SCHEMA_INCOMPATIBLE: &str = "OTA301";
    pub const STORE_QUERY: &str = "OTA302";
    pub const FILESYSTEM: &str = "OTA303";
    pub const NO_LAUNCHABLE_UPDATE: &str = "OTA400";
    pub const CONTROLLER_STATE: &str = "OTA410";
}

/// Errors surfaced by the update store, loaders, launcher, and controller.
#[derive(Debug, thiserror::Error)]
pub enum UpdatesError {
    #[error("[OTA100] request to {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("[OTA110] manifest rejected: {0}")]
    ManifestParse(#[from] ManifestError),
    #[error("[OTA120] asset {key} {hash_type} mismatch (expected {expected}, found {actual})")]
    HashMismatch {
        key: String,
        hash_type: &'static str,
        expected: String,
        actual: String,
    },
    #[error("[OTA200] update {0} is already recorded")]
    DuplicateId(String),
    #[error(
        "[OTA201] update {update_id} is incomplete ({launch_assets} launch assets; missing: {})",
        .missing.join(", ")
    )]
    IncompleteAssets {
        update_id: String,
        missing: Vec<String>,
        launch_assets: usize,
    },
    #[error("[OTA202] update {0} is not in the catalog")]
    UnknownUpdate(String),
    #[error("[OTA202] asset {key} ({hash_type}) is not in the catalog")]
    UnknownAsset { key: String, hash_type: &'static str },
    #[error("[OTA203] asset {key} ({hash_type}) is recorded with digest {existing}, refusing {incoming}")]
    AssetConflict {
        key: String,
        hash_type: &'static str,
        existing: String,
        incoming: String,
    },
    #[error("[OTA300] update store at {path} is unavailable: {reason}")]
    StoreUnavailable { path: PathBuf, reason: String },
    #[error("[OTA301] update store schema incompatible for {key}: expected {expected}, found {found}")]
    IncompatibleSchema {
        key: String,
        expected: String,
        found: String,
    },
    #[error("[OTA302] update store query failed: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("[OTA303] filesystem operation on {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("[OTA400] no launchable update: {0}")]
    NoLaunchableUpdate(String),
    #[error("[OTA410] controller cannot {0}")]
    InvalidState(&'static str),
}

impl UpdatesError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn network(url: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Network {
            url: url.into(),
            reason: format!("{err:#}"),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => codes::NETWORK,
            Self::ManifestParse(_) => codes::MANIFEST_PARSE,
            Self::HashMismatch { .. } => codes::HASH_MISMATCH,
            Self::DuplicateId(_) => codes::DUPLICATE_ID,
            Self::IncompleteAssets { .. } => codes::INCOMPLETE_ASSETS,
            Self::UnknownUpdate(_) | Self::UnknownAsset { .. } => codes::UNKNOWN_ENTRY,
            Self::AssetConflict { .. } => codes::ASSET_CONFLICT,
            Self::StoreUnavailable { .. } => codes::STORE_UNAVAILABLE,
            Self::IncompatibleSchema { .. } => codes::SCHEMA_INCOMPATIBLE,
            Self::Database(_) => codes::STORE_QUERY,
            Self::Io { .. } => codes::FILESYSTEM,
            Self::NoLaunchableUpdate(_) => codes::NO_LAUNCHABLE_UPDATE,
            Self::InvalidState(_) => codes::CONTROLLER_STATE,
        }
    }

    /// Coarse area used when reporting the error to the host.
    #[must_use]
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::ManifestParse(_) => "manifest",
            Self::HashMismatch { .. } => "integrity",
            Self::DuplicateId(_)
            | Self::IncompleteAssets { .. }
            | Self::UnknownUpdate(_)
            | Self::UnknownAsset { .. }
            | Self::AssetConflict { .. } => "catalog",
            Self::StoreUnavailable { .. }
            | Self::IncompatibleSchema { .. }
            | Self::Database(_)
            | Self::Io { .. } => "store",
            Self::NoLaunchableUpdate(_) => "launch",
            Self::InvalidState(_) => "controller",
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

pub type Result<T, E = UpdatesError> = std::result::Result<T, E>;
