//! Per-platform download plan.
//!
//! The native agent on Windows consumes a delta release index next to the
//! full package; everywhere else a single archive is enough. The choice is
//! made once here so the downloader and the feed server stay platform
//! agnostic.

use std::path::{Path, PathBuf};

use updatex_types::{Platform, UpdateError, UpdateMetadata, UpdateResult};

use super::downloader::{DownloadTask, Downloader};

pub const RELEASES_FILE_NAME: &str = "RELEASES";
pub const FALLBACK_ARTIFACT_NAME: &str = "update.zip";

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadPlan {
    SingleArtifact {
        artifact_url: String,
    },
    DeltaIndexed {
        releases_url: String,
        artifact_url: String,
    },
}

/// Files produced by a successful download cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub artifact_path: PathBuf,
    pub releases_path: Option<PathBuf>,
}

impl CachedArtifact {
    pub fn single(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            releases_path: None,
        }
    }

    pub fn with_releases(mut self, releases_path: impl Into<PathBuf>) -> Self {
        self.releases_path = Some(releases_path.into());
        self
    }
}

impl DownloadPlan {
    pub fn for_platform(platform: &Platform, meta: &UpdateMetadata) -> UpdateResult<Self> {
        let artifact_url = meta
            .artifact_url()
            .ok_or_else(|| {
                UpdateError::configuration(format!(
                    "update {} has no artifact URL for {}",
                    meta.version, platform
                ))
            })?
            .to_string();

        if !platform.uses_release_index() {
            return Ok(DownloadPlan::SingleArtifact { artifact_url });
        }

        let releases_url = meta
            .release_index_url()
            .ok_or_else(|| {
                UpdateError::configuration(format!(
                    "update {} has no updateReleases URL for {}",
                    meta.version, platform
                ))
            })?
            .to_string();

        Ok(DownloadPlan::DeltaIndexed {
            releases_url,
            artifact_url,
        })
    }

    pub fn artifact_url(&self) -> &str {
        match self {
            DownloadPlan::SingleArtifact { artifact_url }
            | DownloadPlan::DeltaIndexed { artifact_url, .. } => artifact_url,
        }
    }

    /// Cache locations for this plan under `cache_dir`
    pub fn cached_artifact(&self, cache_dir: &Path) -> CachedArtifact {
        let artifact = cache_dir.join(artifact_file_name(self.artifact_url()));
        match self {
            DownloadPlan::SingleArtifact { .. } => CachedArtifact::single(artifact),
            DownloadPlan::DeltaIndexed { .. } => {
                CachedArtifact::single(artifact).with_releases(cache_dir.join(RELEASES_FILE_NAME))
            }
        }
    }

    /// Download tasks, release index first
    pub fn tasks(&self, cached: &CachedArtifact) -> Vec<DownloadTask> {
        let artifact = DownloadTask::to_file(self.artifact_url(), &cached.artifact_path);
        match (self, &cached.releases_path) {
            (DownloadPlan::DeltaIndexed { releases_url, .. }, Some(releases_path)) => vec![
                DownloadTask::to_file(releases_url.as_str(), releases_path),
                artifact,
            ],
            _ => vec![artifact],
        }
    }

    /// Index of the artifact task in [`DownloadPlan::tasks`]
    pub fn primary_task(&self) -> usize {
        match self {
            DownloadPlan::SingleArtifact { .. } => 0,
            DownloadPlan::DeltaIndexed { .. } => 1,
        }
    }
}

fn artifact_file_name(url: &str) -> String {
    Downloader::extract_filename_from_url(url)
        .filter(|name| {
            name != "."
                && name != ".."
                && name != RELEASES_FILE_NAME
                && !name.contains('\\')
        })
        .unwrap_or_else(|| FALLBACK_ARTIFACT_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::updater::downloader::DownloadSink;

    fn win_meta() -> UpdateMetadata {
        UpdateMetadata::new("2.0.0")
            .with_update_url("http://x/app-2.0.0.zip")
            .with_releases_url("http://x/RELEASES")
    }

    #[test]
    fn test_win32_plan_fetches_index_and_artifact() {
        let plan = DownloadPlan::for_platform(&Platform::Win32, &win_meta()).unwrap();
        assert_eq!(
            plan,
            DownloadPlan::DeltaIndexed {
                releases_url: "http://x/RELEASES".to_string(),
                artifact_url: "http://x/app-2.0.0.zip".to_string(),
            }
        );

        let cache = Path::new("/cache");
        let cached = plan.cached_artifact(cache);
        assert_eq!(cached.artifact_path, PathBuf::from("/cache/app-2.0.0.zip"));
        assert_eq!(cached.releases_path, Some(PathBuf::from("/cache/RELEASES")));

        let tasks = plan.tasks(&cached);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].url, "http://x/RELEASES");
        assert_eq!(
            tasks[plan.primary_task()].sink,
            DownloadSink::File(PathBuf::from("/cache/app-2.0.0.zip"))
        );
    }

    #[test]
    fn test_darwin_plan_is_single_artifact() {
        let plan = DownloadPlan::for_platform(&Platform::Darwin, &win_meta()).unwrap();
        let cached = plan.cached_artifact(Path::new("/cache"));

        assert_eq!(cached.releases_path, None);
        assert_eq!(plan.tasks(&cached).len(), 1);
        assert_eq!(plan.primary_task(), 0);
    }

    #[test]
    fn test_missing_urls_are_configuration_errors() {
        let meta = UpdateMetadata::new("2.0.0");
        let err = DownloadPlan::for_platform(&Platform::Darwin, &meta).unwrap_err();
        assert_eq!(err.kind(), updatex_types::ErrorKind::Configuration);

        let meta = UpdateMetadata::new("2.0.0").with_update_url("http://x/app.zip");
        let err = DownloadPlan::for_platform(&Platform::Win32, &meta).unwrap_err();
        assert_eq!(err.kind(), updatex_types::ErrorKind::Configuration);
    }

    #[test]
    fn test_artifact_file_name_fallbacks() {
        assert_eq!(artifact_file_name("http://x/dl/app.zip?sig=1"), "app.zip");
        assert_eq!(artifact_file_name("http://x/"), FALLBACK_ARTIFACT_NAME);
        assert_eq!(artifact_file_name("http://x/RELEASES"), FALLBACK_ARTIFACT_NAME);
        assert_eq!(artifact_file_name("http://x/.."), FALLBACK_ARTIFACT_NAME);
    }
}
