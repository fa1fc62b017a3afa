//! Seam to the platform's native update agent.
//!
//! The agent is told where the local feed lives, asked to check it, and
//! later reports back with [`NativeAgentEvent`]s which the host forwards to
//! [`UpdateManager::handle_native_event`](super::UpdateManager::handle_native_event).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use updatex_types::{UpdateError, UpdateResult};

use super::downloader::{DownloadTask, Downloader};
use crate::core::config::DEFAULT_STALL_TIMEOUT_SECS;

/// Feed location handed to the native agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRegistration {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl FeedRegistration {
    /// Registration with caching disabled
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![("Cache-Control".to_string(), "no-cache".to_string())],
        }
    }
}

/// What the native agent reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeAgentEvent {
    UpdateDownloaded,
    Error(String),
}

#[async_trait]
pub trait NativeAgent: Send + Sync {
    async fn register_feed(&self, feed: &FeedRegistration) -> UpdateResult<()>;

    /// Start fetching from the registered feed; completion is reported
    /// asynchronously
    async fn start_check(&self) -> UpdateResult<()>;

    async fn quit_and_install(&self) -> UpdateResult<()>;
}

/// Agent that pulls the artifact from the feed into a staging directory.
///
/// Stands in for a real installer on hosts without one and exercises the
/// feed exactly the way a native agent does: `GET /`, then the advertised
/// URL.
pub struct FeedProbeAgent {
    staging_dir: PathBuf,
    feed: Mutex<Option<FeedRegistration>>,
    events: mpsc::UnboundedSender<NativeAgentEvent>,
}

impl FeedProbeAgent {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<NativeAgentEvent>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            feed: Mutex::new(None),
            events,
        }
    }

    /// Agent plus the receiving end of its event channel
    pub fn channel(
        staging_dir: impl Into<PathBuf>,
    ) -> (Self, mpsc::UnboundedReceiver<NativeAgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(staging_dir, tx), rx)
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn feed(&self) -> MutexGuard<'_, Option<FeedRegistration>> {
        self.feed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn probe(feed: FeedRegistration, staging_dir: PathBuf) -> UpdateResult<PathBuf> {
        let downloader = Downloader::with_headers(
            std::time::Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
            &feed.headers,
        )?;

        let index = downloader.fetch_json(&feed.url).await?;
        let asset_url = index
            .get("url")
            .and_then(|url| url.as_str())
            .ok_or_else(|| UpdateError::parse(format!("feed index {}", feed.url), "missing url"))?
            .to_string();

        let name = Downloader::extract_filename_from_url(&asset_url)
            .unwrap_or_else(|| "update.zip".to_string());
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| UpdateError::filesystem(&staging_dir, e))?;
        let target = staging_dir.join(name);

        downloader
            .fetch_all(vec![DownloadTask::to_file(asset_url, &target)], None)
            .await?;
        Ok(target)
    }
}

#[async_trait]
impl NativeAgent for FeedProbeAgent {
    async fn register_feed(&self, feed: &FeedRegistration) -> UpdateResult<()> {
        log::info!("[FeedProbe] Feed registered: {}", feed.url);
        *self.feed() = Some(feed.clone());
        Ok(())
    }

    async fn start_check(&self) -> UpdateResult<()> {
        let Some(feed) = self.feed().clone() else {
            return Err(UpdateError::Protocol(
                "no feed registered with the native agent".to_string(),
            ));
        };

        let staging_dir = self.staging_dir.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match Self::probe(feed, staging_dir).await {
                Ok(path) => {
                    log::info!("[FeedProbe] Staged update at {:?}", path);
                    NativeAgentEvent::UpdateDownloaded
                }
                Err(e) => {
                    log::error!("[FeedProbe] {}", e);
                    NativeAgentEvent::Error(e.to_string())
                }
            };
            if events.send(event).is_err() {
                log::warn!("[FeedProbe] Nobody is listening for agent events");
            }
        });
        Ok(())
    }

    async fn quit_and_install(&self) -> UpdateResult<()> {
        Err(UpdateError::Protocol(
            "the feed probe agent cannot install updates".to_string(),
        ))
    }
}
