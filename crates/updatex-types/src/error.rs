use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub type UpdateResult<T> = Result<T, UpdateError>;

/// Failure anywhere in the update pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpdateError {
    /// Missing feed URL, download before check, unusable settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection, DNS or transport failure
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Server answered with a non-success status
    #[error("{url} responded with HTTP {status}")]
    Http { url: String, status: u16 },

    /// No data received within the stall window
    #[error("timeout error downloading file {url}: no data for {window:?}")]
    Timeout { url: String, window: Duration },

    /// Malformed manifest or version
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Cache directory or file I/O failure
    #[error("filesystem error at {}: {message}", path.display())]
    Filesystem { path: PathBuf, message: String },

    /// The native update agent reported a failure
    #[error("native update agent error: {0}")]
    Protocol(String),
}

/// Discriminant of [`UpdateError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Network,
    Timeout,
    Parse,
    Filesystem,
    Protocol,
}

impl UpdateError {
    pub fn configuration(message: impl Into<String>) -> Self {
        UpdateError::Configuration(message.into())
    }

    pub fn network(url: impl Into<String>, err: impl Display) -> Self {
        UpdateError::Network {
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub fn timeout(url: impl Into<String>, window: Duration) -> Self {
        UpdateError::Timeout {
            url: url.into(),
            window,
        }
    }

    pub fn parse(what: impl Into<String>, err: impl Display) -> Self {
        UpdateError::Parse {
            what: what.into(),
            message: err.to_string(),
        }
    }

    pub fn filesystem(path: impl AsRef<Path>, err: impl Display) -> Self {
        UpdateError::Filesystem {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::Configuration(_) => ErrorKind::Configuration,
            UpdateError::Network { .. } | UpdateError::Http { .. } => ErrorKind::Network,
            UpdateError::Timeout { .. } => ErrorKind::Timeout,
            UpdateError::Parse { .. } => ErrorKind::Parse,
            UpdateError::Filesystem { .. } => ErrorKind::Filesystem,
            UpdateError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            UpdateError::Http {
                url: "http://x".to_string(),
                status: 404
            }
            .kind(),
            ErrorKind::Network
        );
        assert_eq!(
            UpdateError::timeout("http://x/a.zip", Duration::from_secs(240)).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_messages_are_readable() {
        let err = UpdateError::timeout("http://x/a.zip", Duration::from_secs(240));
        assert_eq!(
            err.to_string(),
            "timeout error downloading file http://x/a.zip: no data for 240s"
        );

        let err = UpdateError::filesystem("/tmp/cache", "permission denied");
        assert_eq!(
            err.to_string(),
            "filesystem error at /tmp/cache: permission denied"
        );
    }
}
