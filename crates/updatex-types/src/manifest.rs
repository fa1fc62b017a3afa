use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Platform;

/// Remote update manifest: platform identifier -> latest release entry.
///
/// Entries are kept as raw JSON so a malformed entry for one platform
/// never prevents reading the entry for another.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateManifest {
    entries: HashMap<String, serde_json::Value>,
}

impl UpdateManifest {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Entry published for `platform`.
    ///
    /// Returns `None` when the key is absent, the entry is not an object,
    /// or it carries no usable `version`.
    pub fn entry_for(&self, platform: &Platform) -> Option<UpdateMetadata> {
        let value = self.entries.get(platform.identifier())?;
        let entry: UpdateMetadata = serde_json::from_value(value.clone()).ok()?;
        if entry.version.trim().is_empty() {
            return None;
        }
        Some(entry)
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The manifest entry selected for the running platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMetadata {
    pub version: String,
    /// Artifact URL (`update` in published manifests)
    #[serde(
        rename = "update",
        alias = "updateUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_url: Option<String>,
    /// Delta release index URL, Windows only
    #[serde(
        rename = "updateReleases",
        alias = "releasesUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub releases_url: Option<String>,
    /// Any other fields the publisher added (release notes, dates, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UpdateMetadata {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            update_url: None,
            releases_url: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_update_url(mut self, url: impl Into<String>) -> Self {
        self.update_url = Some(url.into());
        self
    }

    pub fn with_releases_url(mut self, url: impl Into<String>) -> Self {
        self.releases_url = Some(url.into());
        self
    }

    /// Artifact URL, if present and non-empty
    pub fn artifact_url(&self) -> Option<&str> {
        self.update_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Release index URL, if present and non-empty
    pub fn release_index_url(&self) -> Option<&str> {
        self.releases_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
