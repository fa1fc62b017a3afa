use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use updatex_types::{UpdateError, UpdateResult};

use crate::core::logger::LoggerHandle;
use crate::core::updater::Version;

/// Stall window for a single transfer, reset by every received chunk
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 240;

/// Updater configuration, supplied once per process
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterConfig {
    /// Manifest URL
    #[serde(default, alias = "feedUrl")]
    pub url: String,
    /// Version of the running application
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(
        default = "default_true",
        alias = "checkUpdateOnStart",
        alias = "check_on_start"
    )]
    pub check_on_start: bool,
    #[serde(default = "default_true", alias = "auto_download")]
    pub auto_download: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(
        default = "default_stall_timeout_secs",
        alias = "stall_timeout_secs"
    )]
    pub stall_timeout_secs: u64,
    /// Overrides `<user data>/Cache`
    #[serde(default, alias = "cache_dir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(skip)]
    pub logger: LoggerHandle,
    /// Stall window below one second, only reachable from code
    #[serde(skip)]
    stall_timeout_override: Option<Duration>,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_true() -> bool {
    true
}

fn default_stall_timeout_secs() -> u64 {
    DEFAULT_STALL_TIMEOUT_SECS
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            version: default_version(),
            check_on_start: true,
            auto_download: true,
            disabled: false,
            stall_timeout_secs: DEFAULT_STALL_TIMEOUT_SECS,
            cache_dir: None,
            logger: LoggerHandle::default(),
            stall_timeout_override: None,
        }
    }
}

impl UpdaterConfig {
    pub fn new(url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_check_on_start(mut self, enabled: bool) -> Self {
        self.check_on_start = enabled;
        self
    }

    pub fn with_auto_download(mut self, enabled: bool) -> Self {
        self.auto_download = enabled;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_logger(mut self, logger: LoggerHandle) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_secs = timeout.as_secs();
        self.stall_timeout_override = Some(timeout);
        self
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout_override
            .unwrap_or_else(|| Duration::from_secs(self.stall_timeout_secs))
    }

    /// Trim fields, fill defaults and validate the running version
    pub fn normalize(mut self) -> UpdateResult<Self> {
        self.url = self.url.trim().to_string();
        self.version = self.version.trim().to_string();
        if self.version.is_empty() {
            self.version = default_version();
        }
        if self.stall_timeout_secs == 0 && self.stall_timeout_override.is_none() {
            self.stall_timeout_secs = DEFAULT_STALL_TIMEOUT_SECS;
        }
        Version::parse(&self.version).map_err(|e| {
            UpdateError::configuration(format!(
                "current version '{}' is not a semantic version: {}",
                self.version, e
            ))
        })?;
        Ok(self)
    }

    pub fn current_version(&self) -> UpdateResult<Version> {
        Version::parse(&self.version)
            .map_err(|e| UpdateError::parse(format!("version '{}'", self.version), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UpdaterConfig::default();
        assert!(config.url.is_empty());
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
        assert!(config.check_on_start);
        assert!(config.auto_download);
        assert!(!config.disabled);
        assert_eq!(config.stall_timeout(), Duration::from_secs(240));
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let json = r#"{
            "feedUrl": "https://updates.example.com/manifest.json",
            "version": "1.0.0",
            "autoDownload": false
        }"#;
        let config: UpdaterConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.url, "https://updates.example.com/manifest.json");
        assert_eq!(config.version, "1.0.0");
        assert!(!config.auto_download);
        assert!(config.check_on_start);
        assert_eq!(config.stall_timeout_secs, DEFAULT_STALL_TIMEOUT_SECS);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_config_accepts_snake_case() {
        let json =
            r#"{"url":"u","check_on_start":false,"stall_timeout_secs":30,"cache_dir":"/tmp/c"}"#;
        let config: UpdaterConfig = serde_json::from_str(json).unwrap();

        assert!(!config.check_on_start);
        assert_eq!(config.stall_timeout(), Duration::from_secs(30));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/c")));
    }

    #[test]
    fn test_normalize() {
        let config = UpdaterConfig::new("  http://x/manifest.json ", " v1.2.3 ")
            .normalize()
            .unwrap();
        assert_eq!(config.url, "http://x/manifest.json");
        assert_eq!(config.version, "v1.2.3");
        assert_eq!(config.current_version().unwrap(), Version::new(1, 2, 3));

        let config = UpdaterConfig::new("http://x", "").normalize().unwrap();
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_normalize_rejects_bad_version() {
        let err = UpdaterConfig::new("http://x", "one.two")
            .normalize()
            .unwrap_err();
        assert_eq!(err.kind(), updatex_types::ErrorKind::Configuration);
    }

    #[test]
    fn test_sub_second_stall_timeout() {
        let config = UpdaterConfig::default().with_stall_timeout(Duration::from_millis(150));
        assert_eq!(config.stall_timeout(), Duration::from_millis(150));
        let config = config.normalize().unwrap();
        assert_eq!(config.stall_timeout(), Duration::from_millis(150));
    }

    #[test]
    fn test_serialization_skips_logger() {
        let config = UpdaterConfig::new("http://x", "1.0.0");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"checkOnStart\":true"));
        assert!(json.contains("\"stallTimeoutSecs\":240"));
        assert!(!json.contains("logger"));
    }
}
