use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Lifecycle state persisted for each update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    Pending,
    Ready,
    Embedded,
}

impl UpdateStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Embedded => "embedded",
        }
    }

    /// Whether an update in this state may be handed to the launcher.
    #[must_use]
    pub fn is_launchable(self) -> bool {
        matches!(self, Self::Ready | Self::Embedded)
    }
}

impl TryFrom<&str> for UpdateStatus {
    type Error = UnknownVariant;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "embedded" => Ok(Self::Embedded),
            other => Err(UnknownVariant {
                kind: "update status",
                value: other.to_string(),
            }),
        }
    }
}

/// Digest algorithm used to verify an asset's bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    Sha1,
    Sha256,
}

impl HashType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the lowercase hex digest produced by this algorithm.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }
}

impl TryFrom<&str> for HashType {
    type Error = UnknownVariant;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(UnknownVariant {
                kind: "hash type",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// One versioned, deployable bundle+asset set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub commit_time: i64,
    pub binary_compatibility: String,
    pub metadata: Map<String, Value>,
    pub status: UpdateStatus,
    pub raw_manifest: String,
}

impl Update {
    /// Returns true when the running binary token appears in this update's
    /// comma-separated compatibility list.
    #[must_use]
    pub fn is_compatible_with(&self, binary_token: &str) -> bool {
        self.binary_compatibility
            .split(',')
            .map(str::trim)
            .any(|candidate| !candidate.is_empty() && candidate == binary_token)
    }
}

/// One content-addressed file referenced by one or more updates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Catalog row id; `None` until the asset has been recorded.
    pub row_id: Option<i64>,
    pub key: String,
    pub hash_type: HashType,
    pub content_hash: String,
    pub url: Option<Url>,
    pub local_path: Option<PathBuf>,
    pub is_launch_asset: bool,
    /// File name inside the embedded bundle, for assets shipped with the binary.
    pub embedded_path: Option<String>,
}

impl Asset {
    #[must_use]
    pub fn new(key: impl Into<String>, hash_type: HashType, content_hash: impl Into<String>) -> Self {
        Self {
            row_id: None,
            key: key.into(),
            hash_type,
            content_hash: content_hash.into(),
            url: None,
            local_path: None,
            is_launch_asset: false,
            embedded_path: None,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    #[must_use]
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_embedded_path(mut self, path: impl Into<String>) -> Self {
        self.embedded_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn launch(mut self) -> Self {
        self.is_launch_asset = true;
        self
    }

    /// Two assets denote the same stored file when their dedup identity matches.
    #[must_use]
    pub fn same_identity(&self, other: &Asset) -> bool {
        self.key == other.key && self.hash_type == other.hash_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(compat: &str) -> Update {
        Update {
            id: "u1".to_string(),
            commit_time: 0,
            binary_compatibility: compat.to_string(),
            metadata: Map::new(),
            status: UpdateStatus::Ready,
            raw_manifest: "{}".to_string(),
        }
    }

    #[test]
    fn compatibility_accepts_any_listed_token() {
        let update = update("1.0.0, 1.0.1");
        assert!(update.is_compatible_with("1.0.0"));
        assert!(update.is_compatible_with("1.0.1"));
        assert!(!update.is_compatible_with("1.0"));
    }

    #[test]
    fn empty_compatibility_matches_nothing() {
        assert!(!update("").is_compatible_with(""));
    }

    #[test]
    fn hash_type_parses_common_spellings() {
        assert_eq!(HashType::try_from("SHA-1").unwrap(), HashType::Sha1);
        assert_eq!(HashType::try_from("sha256").unwrap(), HashType::Sha256);
        assert!(HashType::try_from("md5").is_err());
    }
}
