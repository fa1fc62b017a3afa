//! Update delivery pipeline for desktop applications.
//!
//! [`UpdateManager`] checks a JSON manifest for a newer version of the
//! running build, downloads the artifact (plus the delta `RELEASES` index
//! on Windows) into a local cache, and exposes it to the platform's native
//! update agent through a short-lived loopback HTTP feed. Progress and
//! outcomes are published on an [`UpdateEventBusContainer`].

pub mod core;

pub use crate::core::config::{DEFAULT_STALL_TIMEOUT_SECS, UpdaterConfig};
pub use crate::core::config_manager;
pub use crate::core::logger::{LogFacadeLogger, LoggerHandle, NoopLogger, UpdateLogger};
pub use crate::core::updater::{
    CachedArtifact, CheckOutcome, DownloadPlan, Downloader, FeedProbeAgent, FeedRegistration,
    FeedServerSession, HostContext, NativeAgent, NativeAgentEvent, UpdateCheckResult,
    UpdateChecker, UpdateManager, Version,
};
pub use updatex_event_bus::{SubscriptionId, UpdateEventBusContainer};
pub use updatex_types::{
    ErrorKind, InstallerEvent, Platform, UpdateError, UpdateEvent, UpdateManifest,
    UpdateMetadata, UpdateResult, UpdateState,
};
