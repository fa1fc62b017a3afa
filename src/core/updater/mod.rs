mod checker;
mod downloader;
mod feed_server;
mod native;
mod plan;
mod version;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use updatex_event_bus::{SubscriptionId, UpdateEventBusContainer};
use updatex_types::{
    InstallerEvent, Platform, UpdateError, UpdateEvent, UpdateMetadata, UpdateResult, UpdateState,
};

pub use checker::{UpdateCheckResult, UpdateChecker};
pub use downloader::{
    DownloadOutput, DownloadProgress, DownloadSink, DownloadTask, Downloader, ProgressCallback,
};
pub use feed_server::{FeedServerSession, RELEASES_ROUTE, generate_asset_path};
pub use native::{FeedProbeAgent, FeedRegistration, NativeAgent, NativeAgentEvent};
pub use plan::{CachedArtifact, DownloadPlan, FALLBACK_ARTIFACT_NAME, RELEASES_FILE_NAME};
pub use version::Version;

use crate::core::config::UpdaterConfig;
use crate::core::config_manager;
use crate::core::logger::LoggerHandle;

/// Facts about the running process that only the host can tell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Installed build rather than a development run
    pub eligible: bool,
    /// Installer lifecycle event this process was launched for
    pub installer_event: Option<InstallerEvent>,
}

impl HostContext {
    pub fn installed() -> Self {
        Self {
            eligible: true,
            installer_event: None,
        }
    }

    pub fn development() -> Self {
        Self {
            eligible: false,
            installer_event: None,
        }
    }

    /// Eligible host, installer event taken from the process arguments
    pub fn from_env() -> Self {
        Self {
            eligible: true,
            installer_event: InstallerEvent::detect(&Platform::current(), std::env::args().skip(1)),
        }
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::installed()
    }
}

/// What a call to [`UpdateManager::check_for_updates`] ended with
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Disabled,
    /// Another check, download or feed session is running
    Busy,
    NoUpdate,
    Available(UpdateMetadata),
}

/// Mutable state of the current update cycle
struct Cycle {
    state: UpdateState,
    metadata: Option<UpdateMetadata>,
    session: Option<FeedServerSession>,
    cached: Option<CachedArtifact>,
}

struct Inner {
    config: RwLock<UpdaterConfig>,
    platform: Platform,
    cache_dir: PathBuf,
    downloader: Downloader,
    agent: Arc<dyn NativeAgent>,
    events: UpdateEventBusContainer,
    cycle: Mutex<Cycle>,
}

/// Update manager that coordinates checking, downloading and handing the
/// artifact to the native agent
#[derive(Clone)]
pub struct UpdateManager {
    inner: Arc<Inner>,
}

impl UpdateManager {
    /// Create a manager for the current platform without running any
    /// start-up behaviour
    pub fn new(config: UpdaterConfig, agent: Arc<dyn NativeAgent>) -> UpdateResult<Self> {
        Self::for_platform(config, Platform::current(), agent)
    }

    pub fn for_platform(
        config: UpdaterConfig,
        platform: Platform,
        agent: Arc<dyn NativeAgent>,
    ) -> UpdateResult<Self> {
        let config = config.normalize()?;
        let cache_dir = config_manager::get_cache_dir(&config).map_err(|e| {
            UpdateError::configuration(format!("Failed to resolve cache dir: {}", e))
        })?;
        let downloader = Downloader::new(config.stall_timeout())?;

        Ok(Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                platform,
                cache_dir,
                downloader,
                agent,
                events: UpdateEventBusContainer::new(),
                cycle: Mutex::new(Cycle {
                    state: UpdateState::Idle,
                    metadata: None,
                    session: None,
                    cached: None,
                }),
            }),
        })
    }

    /// Create a manager and apply the start-up rules for `host`.
    ///
    /// Must be called inside a tokio runtime when `checkOnStart` is set.
    pub fn initialize(
        config: UpdaterConfig,
        host: &HostContext,
        agent: Arc<dyn NativeAgent>,
    ) -> UpdateResult<Self> {
        let manager = Self::new(config, agent)?;
        manager.start(host);
        Ok(manager)
    }

    /// Apply the start-up rules for `host` to an idle manager
    pub fn start(&self, host: &HostContext) {
        if let Some(event) = host.installer_event {
            self.logger().info(&format!(
                "Launched for installer event {}, skipping update checks",
                event.as_str()
            ));
            self.set_state(UpdateState::Disabled);
            self.publish(UpdateEvent::SquirrelEvent(event));
            return;
        }

        let (disabled, check_on_start) = {
            let config = self.read_config();
            (config.disabled, config.check_on_start)
        };

        if disabled || !host.eligible {
            self.logger().warn("Update is disabled");
            self.set_state(UpdateState::Disabled);
            self.publish(UpdateEvent::UpdateDisabled);
            return;
        }

        if !check_on_start {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.clone();
                handle.spawn(async move {
                    let _ = manager.check_for_updates().await;
                });
            }
            Err(_) => self
                .logger()
                .warn("No async runtime available, skipping update check on start"),
        }
    }

    /// Fetch the manifest and compare its entry for this platform against
    /// the running version.
    ///
    /// Failures are also published as `error` events. With `autoDownload`
    /// an available update is downloaded before this returns.
    pub async fn check_for_updates(&self) -> UpdateResult<CheckOutcome> {
        let config = self.config();

        {
            let mut cycle = self.cycle();
            if cycle.state == UpdateState::Disabled {
                drop(cycle);
                self.logger().warn("Update is disabled");
                return Ok(CheckOutcome::Disabled);
            }
            if cycle.state.is_in_flight() {
                drop(cycle);
                self.logger().warn("An update cycle is already running");
                return Ok(CheckOutcome::Busy);
            }
            if config.url.is_empty() {
                drop(cycle);
                return Err(self.fail(UpdateError::configuration(
                    "You must set url before calling check_for_updates()",
                )));
            }
            cycle.state = UpdateState::Checking;
        }

        self.logger()
            .debug(&format!("Checking for updates at {}", config.url));
        let checker = UpdateChecker::new(self.inner.downloader.clone())
            .with_platform(self.inner.platform.clone());

        match checker.check(&config.url, &config.version).await {
            Ok(UpdateCheckResult::NoUpdate) => {
                {
                    let mut cycle = self.cycle();
                    cycle.state = UpdateState::NotAvailable;
                    cycle.metadata = None;
                }
                self.logger().debug(&format!(
                    "Update for {} is not available",
                    self.inner.platform
                ));
                self.publish(UpdateEvent::UpdateNotAvailable);
                Ok(CheckOutcome::NoUpdate)
            }
            Ok(UpdateCheckResult::UpdateAvailable(meta)) => {
                {
                    let mut cycle = self.cycle();
                    cycle.state = UpdateState::Available;
                    cycle.metadata = Some(meta.clone());
                }
                self.logger()
                    .info(&format!("Found version {} at {}", meta.version, config.url));
                self.publish(UpdateEvent::UpdateAvailable(meta.clone()));

                if config.auto_download {
                    let _ = self.download_update().await;
                }
                Ok(CheckOutcome::Available(meta))
            }
            Err(e) => {
                self.set_state(UpdateState::Idle);
                Err(self.fail(e))
            }
        }
    }

    /// Download the artifacts of the available update, serve them on the
    /// local feed and hand the feed to the native agent.
    ///
    /// Returns the feed URL. Requires a preceding successful check.
    pub async fn download_update(&self) -> UpdateResult<String> {
        let prepared = {
            let mut cycle = self.cycle();
            match (cycle.state, cycle.metadata.clone()) {
                (UpdateState::Available, Some(meta)) if meta.artifact_url().is_some() => {
                    match DownloadPlan::for_platform(&self.inner.platform, &meta) {
                        Ok(plan) => {
                            cycle.state = UpdateState::Downloading;
                            Ok((meta, plan))
                        }
                        Err(e) => Err(e),
                    }
                }
                _ => Err(UpdateError::configuration(
                    "There is no metadata for update. Run check_for_updates first.",
                )),
            }
        };
        let (meta, plan) = prepared.map_err(|e| self.fail(e))?;

        self.logger().info(&format!(
            "Downloading version {} from {}",
            meta.version,
            plan.artifact_url()
        ));
        self.publish(UpdateEvent::UpdateDownloading(meta.clone()));

        let cached = match self.fetch_plan(&plan).await {
            Ok(cached) => cached,
            Err(e) => {
                self.set_state(UpdateState::Available);
                return Err(self.fail(e));
            }
        };

        let session = match FeedServerSession::start(&cached).await {
            Ok(session) => session,
            Err(e) => {
                self.set_state(UpdateState::Available);
                return Err(self.fail(e));
            }
        };
        let feed_url = session.feed_url().to_string();
        {
            let mut cycle = self.cycle();
            cycle.state = UpdateState::Serving;
            cycle.cached = Some(cached);
            if let Some(previous) = cycle.session.replace(session) {
                previous.shutdown();
            }
        }
        self.logger()
            .info(&format!("Feed server for native updates started at {}", feed_url));

        let agent = self.inner.agent.clone();
        let registration = FeedRegistration::new(feed_url.clone());
        let handed_over = async {
            agent.register_feed(&registration).await?;
            agent.start_check().await
        }
        .await;

        if let Err(e) = handed_over {
            self.stop_serving();
            return Err(self.fail(e));
        }
        Ok(feed_url)
    }

    async fn fetch_plan(&self, plan: &DownloadPlan) -> UpdateResult<CachedArtifact> {
        let cache_dir = &self.inner.cache_dir;
        tokio::fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| UpdateError::filesystem(cache_dir, e))?;

        let cached = plan.cached_artifact(cache_dir);
        let primary = plan.primary_task();
        let events = self.inner.events.clone();
        let on_progress: ProgressCallback = Arc::new(move |progress: DownloadProgress| {
            if progress.task == primary {
                events.publish(UpdateEvent::DownloadProgress(progress.percent));
            }
        });

        let tasks = plan.tasks(&cached);
        let targets: Vec<PathBuf> = tasks
            .iter()
            .filter_map(|task| match &task.sink {
                DownloadSink::File(path) => Some(path.clone()),
                DownloadSink::Memory => None,
            })
            .collect();

        if let Err(e) = self.inner.downloader.fetch_all(tasks, Some(on_progress)).await {
            // a sibling may have committed before the failure
            discard_files(&targets).await;
            return Err(e);
        }
        Ok(cached)
    }

    /// Feed a report from the native agent into the state machine
    pub fn handle_native_event(&self, event: NativeAgentEvent) {
        match event {
            NativeAgentEvent::UpdateDownloaded => {
                let meta = {
                    let mut cycle = self.cycle();
                    if cycle.state == UpdateState::Serving {
                        cycle.state = UpdateState::Completed;
                        cycle.session.take();
                        cycle.metadata.clone()
                    } else {
                        None
                    }
                };
                match meta {
                    Some(meta) => {
                        self.logger().info(&format!(
                            "New version {} has been downloaded",
                            meta.version
                        ));
                        self.publish(UpdateEvent::UpdateDownloaded(meta));
                    }
                    None => self
                        .logger()
                        .warn("Native agent reported a download outside of a feed session"),
                }
            }
            NativeAgentEvent::Error(message) => {
                if self.state() == UpdateState::Serving {
                    self.stop_serving();
                }
                self.fail(UpdateError::Protocol(message));
            }
        }
    }

    /// Forward every event from `events` to [`UpdateManager::handle_native_event`]
    pub fn attach_native_events(
        &self,
        mut events: mpsc::UnboundedReceiver<NativeAgentEvent>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.handle_native_event(event);
            }
        })
    }

    /// Ask the native agent to restart into the downloaded update
    pub async fn quit_and_install(&self) -> UpdateResult<()> {
        self.inner
            .agent
            .quit_and_install()
            .await
            .map_err(|e| self.fail(e))
    }

    /// Change the manifest URL used by subsequent checks
    pub fn set_feed_url(&self, url: impl Into<String>) {
        let url = url.into();
        self.write_config().url = url.trim().to_string();
    }

    pub fn state(&self) -> UpdateState {
        self.cycle().state
    }

    /// Entry of the last successful check that found an update
    pub fn metadata(&self) -> Option<UpdateMetadata> {
        self.cycle().metadata.clone()
    }

    /// URL of the running feed server, if any
    pub fn feed_url(&self) -> Option<String> {
        self.cycle()
            .session
            .as_ref()
            .filter(|session| !session.is_closed())
            .map(|session| session.feed_url().to_string())
    }

    pub fn cached_artifact(&self) -> Option<CachedArtifact> {
        self.cycle().cached.clone()
    }

    pub fn config(&self) -> UpdaterConfig {
        self.read_config().clone()
    }

    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    pub fn events(&self) -> &UpdateEventBusContainer {
        &self.inner.events
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Get current application version
    pub fn current_version() -> Version {
        Version::current()
    }

    fn stop_serving(&self) {
        let session = {
            let mut cycle = self.cycle();
            cycle.state = UpdateState::Available;
            cycle.session.take()
        };
        if let Some(session) = session {
            session.shutdown();
        }
    }

    /// Log `err`, publish it as an `error` event and hand it back
    fn fail(&self, err: UpdateError) -> UpdateError {
        let message = err.to_string();
        self.logger().error(&message);
        self.publish(UpdateEvent::Error(message));
        err
    }

    fn publish(&self, event: UpdateEvent) {
        self.inner.events.publish(event);
    }

    fn set_state(&self, state: UpdateState) {
        log::debug!("[UpdateManager] State -> {:?}", state);
        self.cycle().state = state;
    }

    fn logger(&self) -> LoggerHandle {
        self.read_config().logger.clone()
    }

    fn cycle(&self) -> MutexGuard<'_, Cycle> {
        self.inner
            .cycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_config(&self) -> std::sync::RwLockReadGuard<'_, UpdaterConfig> {
        self.inner
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_config(&self) -> std::sync::RwLockWriteGuard<'_, UpdaterConfig> {
        self.inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Remove whatever a failed download cycle left at `paths`
async fn discard_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => log::debug!("[UpdateManager] Discarded {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[UpdateManager] Cannot remove {:?}: {}", path, e),
        }
    }
}
