//! Manifest parsing: turns a raw JSON payload into an [`Update`] plus its
//! ordered asset list.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use url::Url;

use crate::model::{Asset, HashType, Update, UpdateStatus};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("manifest field '{0}' is missing or empty")]
    MissingField(&'static str),
    #[error("manifest commitTime '{0}' is not an RFC 3339 timestamp")]
    InvalidCommitTime(String),
    #[error("asset '{key}' declares unsupported hash type '{hash_type}'")]
    UnsupportedHashType { key: String, hash_type: String },
    #[error("asset '{key}' has a malformed {hash_type} digest '{digest}'")]
    MalformedDigest {
        key: String,
        hash_type: &'static str,
        digest: String,
    },
    #[error("asset '{key}' has an invalid url: {reason}")]
    InvalidUrl { key: String, reason: String },
    #[error("asset '{0}' is listed more than once")]
    DuplicateAsset(String),
    #[error("manifest must declare exactly one launch asset, found {0}")]
    LaunchAssetCount(usize),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    id: String,
    commit_time: Option<RawCommitTime>,
    #[serde(default)]
    binary_compatibility: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    assets: Vec<RawAsset>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCommitTime {
    Millis(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAsset {
    #[serde(default)]
    key: String,
    url: Option<String>,
    #[serde(default = "default_hash_type")]
    hash_type: String,
    #[serde(default)]
    content_hash: String,
    #[serde(default)]
    is_launch_asset: bool,
    embedded_path: Option<String>,
}

fn default_hash_type() -> String {
    HashType::Sha1.as_str().to_string()
}

/// A parsed manifest: the update it describes and its assets in declared order.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub update: Update,
    pub assets: Vec<Asset>,
}

impl Manifest {
    /// Parse a manifest payload. The returned update is always `pending`;
    /// loaders decide the status it is promoted to.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let parsed: RawManifest = serde_json::from_str(raw)?;
        if parsed.id.trim().is_empty() {
            return Err(ManifestError::MissingField("id"));
        }
        let commit_time = match parsed.commit_time {
            Some(RawCommitTime::Millis(value)) => value,
            Some(RawCommitTime::Text(text)) => parse_commit_time(&text)?,
            None => return Err(ManifestError::MissingField("commitTime")),
        };
        if parsed.binary_compatibility.trim().is_empty() {
            return Err(ManifestError::MissingField("binaryCompatibility"));
        }

        let mut seen = HashSet::new();
        let mut assets = Vec::with_capacity(parsed.assets.len());
        for raw_asset in parsed.assets {
            let asset = parse_asset(raw_asset)?;
            if !seen.insert((asset.key.clone(), asset.hash_type)) {
                return Err(ManifestError::DuplicateAsset(asset.key));
            }
            assets.push(asset);
        }

        let launch_assets = assets.iter().filter(|asset| asset.is_launch_asset).count();
        if launch_assets != 1 {
            return Err(ManifestError::LaunchAssetCount(launch_assets));
        }

        Ok(Self {
            update: Update {
                id: parsed.id,
                commit_time,
                binary_compatibility: parsed.binary_compatibility,
                metadata: parsed.metadata.unwrap_or_default(),
                status: UpdateStatus::Pending,
                raw_manifest: raw.to_string(),
            },
            assets,
        })
    }

    #[must_use]
    pub fn launch_asset(&self) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.is_launch_asset)
    }
}

fn parse_commit_time(text: &str) -> Result<i64, ManifestError> {
    let parsed = OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|_| ManifestError::InvalidCommitTime(text.to_string()))?;
    let millis = parsed.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).map_err(|_| ManifestError::InvalidCommitTime(text.to_string()))
}

fn parse_asset(raw: RawAsset) -> Result<Asset, ManifestError> {
    if raw.key.trim().is_empty() {
        return Err(ManifestError::MissingField("assets[].key"));
    }
    let hash_type = HashType::try_from(raw.hash_type.as_str()).map_err(|_| {
        ManifestError::UnsupportedHashType {
            key: raw.key.clone(),
            hash_type: raw.hash_type.clone(),
        }
    })?;
    let digest = raw.content_hash.trim().to_ascii_lowercase();
    if digest.len() != hash_type.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ManifestError::MalformedDigest {
            key: raw.key,
            hash_type: hash_type.as_str(),
            digest: raw.content_hash,
        });
    }
    let url = match raw.url.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(text) => Some(Url::parse(text).map_err(|err| ManifestError::InvalidUrl {
            key: raw.key.clone(),
            reason: err.to_string(),
        })?),
    };

    let mut asset = Asset::new(raw.key, hash_type, digest);
    asset.url = url;
    asset.is_launch_asset = raw.is_launch_asset;
    asset.embedded_path = raw.embedded_path.filter(|path| !path.trim().is_empty());
    Ok(asset)
}
