//! Seams to the outside world: the manifest/asset server and the host runtime
//! that executes launched bundles.

use std::{
    io::{self, Write},
    time::Duration,
};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

const USER_AGENT: &str = concat!("ota-core/", env!("CARGO_PKG_VERSION"));
const BINARY_VERSION_HEADER: &str = "ota-binary-version";
const PLATFORM_HEADER: &str = "ota-platform";

/// Where manifests and asset bytes come from.
pub trait RemoteSource: Send + Sync {
    /// Fetch the current manifest payload.
    fn fetch_manifest(&self) -> Result<String>;

    /// Stream one asset into `sink`, returning the number of bytes written.
    fn fetch_asset(&self, url: &Url, sink: &mut dyn Write) -> Result<u64>;

    /// Human-readable origin for logs and error messages.
    fn describe(&self) -> String;
}

/// Host hooks invoked by the controller.
pub trait HostRuntime: Send + Sync {
    /// Ask the host to tear down and relaunch from the newly launched bundle.
    fn request_reload(&self);

    fn emit(&self, event: &UpdatesEvent) {
        debug!(?event, "updates event");
    }

    fn report_error(&self, report: &ErrorReport) {
        if report.fatal {
            error!(domain = report.domain, "{}", report.description);
        } else {
            warn!(domain = report.domain, "{}", report.description);
        }
    }
}

/// Notifications delivered to the host while the controller runs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UpdatesEvent {
    #[serde(rename_all = "camelCase")]
    UpdateAvailable {
        update_id: String,
        manifest: String,
    },
    NoUpdateAvailable,
    Error {
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub domain: &'static str,
    pub description: String,
    pub fatal: bool,
}

/// Host that only logs, for embedders without a runtime to restart.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingHost;

impl HostRuntime for TracingHost {
    fn request_reload(&self) {
        info!("reload requested");
    }
}

/// Manifest and asset server reached over HTTP.
pub struct HttpRemoteSource {
    client: Client,
    manifest_url: Url,
    binary_version: String,
}

impl HttpRemoteSource {
    pub fn new(manifest_url: Url, binary_version: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            manifest_url,
            binary_version: binary_version.into(),
        })
    }
}

impl RemoteSource for HttpRemoteSource {
    fn fetch_manifest(&self) -> Result<String> {
        let response = self
            .client
            .get(self.manifest_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .header(BINARY_VERSION_HEADER, &self.binary_version)
            .header(PLATFORM_HEADER, std::env::consts::OS)
            .send()
            .with_context(|| format!("failed to fetch {}", self.manifest_url))?
            .error_for_status()
            .with_context(|| format!("unexpected response for {}", self.manifest_url))?;
        response
            .text()
            .with_context(|| format!("failed to read manifest body from {}", self.manifest_url))
    }

    fn fetch_asset(&self, url: &Url, sink: &mut dyn Write) -> Result<u64> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("unexpected response for {url}"))?;
        io::copy(&mut response, sink).with_context(|| format!("stream error for {url}"))
    }

    fn describe(&self) -> String {
        self.manifest_url.to_string()
    }
}

pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("failed to build http client")
}
