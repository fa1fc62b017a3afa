use std::fmt;

/// Operating system family as named in update manifests.
///
/// Identifiers follow the Node.js `process.platform` spelling because
/// manifests published for desktop apps are keyed that way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Darwin,
    Win32,
    Linux,
    Other(String),
}

impl Platform {
    /// Platform of the running binary
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Darwin
        } else if cfg!(target_os = "windows") {
            Platform::Win32
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other(std::env::consts::OS.to_string())
        }
    }

    /// Manifest key for this platform
    pub fn identifier(&self) -> &str {
        match self {
            Platform::Darwin => "darwin",
            Platform::Win32 => "win32",
            Platform::Linux => "linux",
            Platform::Other(name) => name,
        }
    }

    /// Whether the native agent on this platform consumes a delta release index
    pub fn uses_release_index(&self) -> bool {
        matches!(self, Platform::Win32)
    }
}

impl From<&str> for Platform {
    fn from(value: &str) -> Self {
        match value {
            "darwin" | "macos" => Platform::Darwin,
            "win32" | "windows" => Platform::Win32,
            "linux" => Platform::Linux,
            other => Platform::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
