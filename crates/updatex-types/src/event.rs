use crate::{InstallerEvent, UpdateMetadata};

/// Events published by the update orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateEvent {
    /// A newer version was found in the manifest
    UpdateAvailable(UpdateMetadata),
    /// The manifest has nothing newer for this platform
    UpdateNotAvailable,
    /// Updates are switched off for this process
    UpdateDisabled,
    /// Artifact download started
    UpdateDownloading(UpdateMetadata),
    /// Artifact download progress, whole percent
    DownloadProgress(u8),
    /// The native agent finished fetching and staging the update
    UpdateDownloaded(UpdateMetadata),
    /// Any failure in the pipeline, as a readable message
    Error(String),
    /// The process was started for an installer lifecycle action
    SquirrelEvent(InstallerEvent),
}

impl UpdateEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            UpdateEvent::UpdateAvailable(_) => "update-available",
            UpdateEvent::UpdateNotAvailable => "update-not-available",
            UpdateEvent::UpdateDisabled => "update-disabled",
            UpdateEvent::UpdateDownloading(_) => "update-downloading",
            UpdateEvent::DownloadProgress(_) => "download-progress",
            UpdateEvent::UpdateDownloaded(_) => "update-downloaded",
            UpdateEvent::Error(_) => "error",
            UpdateEvent::SquirrelEvent(_) => "squirrel-event",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, UpdateEvent::Error(_))
    }

    pub fn metadata(&self) -> Option<&UpdateMetadata> {
        match self {
            UpdateEvent::UpdateAvailable(meta)
            | UpdateEvent::UpdateDownloading(meta)
            | UpdateEvent::UpdateDownloaded(meta) => Some(meta),
            _ => None,
        }
    }
}

/// Orchestrator state.
///
/// Failures are not a resting state: after emitting an error the
/// orchestrator settles back on `Idle`, `Available` or `Disabled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Checking,
    Available,
    NotAvailable,
    Downloading,
    Serving,
    Completed,
    Disabled,
}

impl UpdateState {
    /// A check, download or feed session is running
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            UpdateState::Checking | UpdateState::Downloading | UpdateState::Serving
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let meta = UpdateMetadata::new("1.0.0");
        assert_eq!(UpdateEvent::UpdateAvailable(meta.clone()).name(), "update-available");
        assert_eq!(UpdateEvent::DownloadProgress(5).name(), "download-progress");
        assert_eq!(UpdateEvent::UpdateDownloaded(meta).name(), "update-downloaded");
        assert_eq!(
            UpdateEvent::SquirrelEvent(InstallerEvent::Install).name(),
            "squirrel-event"
        );
        assert!(UpdateEvent::Error("boom".to_string()).is_error());
    }

    #[test]
    fn test_in_flight_states() {
        assert!(UpdateState::Checking.is_in_flight());
        assert!(UpdateState::Downloading.is_in_flight());
        assert!(UpdateState::Serving.is_in_flight());
        assert!(!UpdateState::Available.is_in_flight());
        assert!(!UpdateState::Completed.is_in_flight());
        assert!(!UpdateState::Disabled.is_in_flight());
    }
}
