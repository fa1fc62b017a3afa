use updatex_types::{Platform, UpdateError, UpdateManifest, UpdateMetadata, UpdateResult};

use super::downloader::Downloader;
use super::version::Version;

/// Result of checking for updates
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCheckResult {
    /// No update available (current version is latest, or nothing published for this platform)
    NoUpdate,
    /// Update available with its manifest entry
    UpdateAvailable(UpdateMetadata),
}

/// Update checker that reads the remote manifest for one platform
#[derive(Clone)]
pub struct UpdateChecker {
    downloader: Downloader,
    platform: Platform,
}

impl UpdateChecker {
    pub fn new(downloader: Downloader) -> Self {
        Self {
            downloader,
            platform: Platform::current(),
        }
    }

    /// Check on behalf of another platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Check for available updates.
    ///
    /// Network and parse failures are errors; a manifest without a usable
    /// entry for this platform is simply `NoUpdate`.
    pub async fn check(
        &self,
        manifest_url: &str,
        current_version: &str,
    ) -> UpdateResult<UpdateCheckResult> {
        let current = Version::parse(current_version).map_err(|e| {
            UpdateError::configuration(format!(
                "current version '{}' is not a semantic version: {}",
                current_version, e
            ))
        })?;

        let value = self.downloader.fetch_json(manifest_url).await?;
        let manifest = UpdateManifest::from_value(value)
            .map_err(|e| UpdateError::parse(format!("update manifest {}", manifest_url), e))?;

        let result = Self::extract_update(&manifest, &self.platform, &current)?;
        match &result {
            UpdateCheckResult::UpdateAvailable(meta) => {
                log::info!("Update available: {} -> {}", current, meta.version)
            }
            UpdateCheckResult::NoUpdate => {
                log::info!("No update available (current: {})", current)
            }
        }
        Ok(result)
    }

    /// Pick the entry for `platform` if it is strictly newer than `current`
    pub fn extract_update(
        manifest: &UpdateManifest,
        platform: &Platform,
        current: &Version,
    ) -> UpdateResult<UpdateCheckResult> {
        let Some(entry) = manifest.entry_for(platform) else {
            log::debug!("Manifest has no entry for {}", platform);
            return Ok(UpdateCheckResult::NoUpdate);
        };

        let latest = Version::parse(&entry.version).map_err(|e| {
            UpdateError::parse(format!("manifest version '{}'", entry.version), e)
        })?;

        if latest.is_newer_than(current) {
            Ok(UpdateCheckResult::UpdateAvailable(entry))
        } else {
            Ok(UpdateCheckResult::NoUpdate)
        }
    }
}
