use std::{collections::HashMap, env, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context};
use dirs_next::data_local_dir;
use url::Url;

pub(crate) const DEFAULT_DOWNLOAD_PARALLELISM: usize = 4;
pub(crate) const DEFAULT_DOWNLOAD_ATTEMPTS: usize = 3;
pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.var(key) {
            Some(value) => !matches!(
                value.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            ),
            None => default,
        }
    }

    fn number(&self, key: &str) -> anyhow::Result<Option<usize>> {
        self.var(key)
            .map(|value| {
                value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("{key} must be a non-negative integer, got '{value}'"))
            })
            .transpose()
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// How often a failed download is retried before the run gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_DOWNLOAD_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadConfig {
    pub parallelism: usize,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_DOWNLOAD_PARALLELISM,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Values that replace their environment variables before defaults apply.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub root: Option<PathBuf>,
    pub binary_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdatesConfig {
    pub root: PathBuf,
    pub binary_version: String,
    pub manifest_url: Option<Url>,
    pub embedded_dir: Option<PathBuf>,
    pub check_on_launch: bool,
    pub reload_on_update: bool,
    pub online: bool,
    pub download: DownloadConfig,
}

impl UpdatesConfig {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, binary_version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            binary_version: binary_version.into(),
            manifest_url: None,
            embedded_dir: None,
            check_on_launch: true,
            reload_on_update: true,
            online: true,
            download: DownloadConfig::default(),
        }
    }

    #[must_use]
    pub fn with_manifest_url(mut self, url: Url) -> Self {
        self.manifest_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_embedded_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.embedded_dir = Some(dir.into());
        self
    }

    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the binary version is unset.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_env_with(&EnvOverrides::default())
    }

    /// Like [`UpdatesConfig::from_env`], with caller-supplied values taking
    /// precedence over their variables.
    pub fn from_env_with(overrides: &EnvOverrides) -> anyhow::Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture(), overrides)
    }

    pub(crate) fn from_snapshot(
        snapshot: &EnvSnapshot,
        overrides: &EnvOverrides,
    ) -> anyhow::Result<Self> {
        let root = match (&overrides.root, snapshot.var("OTA_ROOT")) {
            (Some(root), _) => root.clone(),
            (None, Some(path)) => PathBuf::from(path),
            (None, None) => default_root()?,
        };
        let binary_version = match (&overrides.binary_version, snapshot.var("OTA_BINARY_VERSION")) {
            (Some(version), _) => version.clone(),
            (None, Some(version)) => version.to_string(),
            (None, None) => {
                return Err(anyhow!("OTA_BINARY_VERSION must name the running binary build"))
            }
        };
        let manifest_url = snapshot
            .var("OTA_MANIFEST_URL")
            .map(|value| {
                Url::parse(value).with_context(|| format!("OTA_MANIFEST_URL is not a URL: {value}"))
            })
            .transpose()?;

        let mut download = DownloadConfig::default();
        if let Some(parallelism) = snapshot.number("OTA_DOWNLOAD_PARALLELISM")? {
            download.parallelism = parallelism.max(1);
        }
        if let Some(attempts) = snapshot.number("OTA_DOWNLOAD_ATTEMPTS")? {
            download.retry.attempts = attempts.max(1);
        }

        Ok(Self {
            root,
            binary_version,
            manifest_url,
            embedded_dir: snapshot.var("OTA_EMBEDDED_DIR").map(PathBuf::from),
            check_on_launch: snapshot.flag("OTA_CHECK_ON_LAUNCH", true),
            reload_on_update: snapshot.flag("OTA_RELOAD_ON_UPDATE", true),
            online: snapshot.flag("OTA_ONLINE", true),
            download,
        })
    }

    /// Whether a remote manifest source is configured and allowed.
    #[must_use]
    pub fn remote_enabled(&self) -> bool {
        self.online && self.manifest_url.is_some()
    }
}

/// Default root for the catalog and asset store.
pub fn default_root() -> anyhow::Result<PathBuf> {
    let base = data_local_dir().ok_or_else(|| anyhow!("unable to determine local data directory"))?;
    Ok(base.join("ota"))
}
