use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Semantic version with full precedence rules (prerelease < release).
///
/// Accepts a leading `v` and surrounding whitespace, which release tags
/// and hand-written manifests commonly carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(semver::Version);

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse version from string like "0.4.1", "v0.4.1" or "1.0.0-beta.2"
    pub fn parse(s: &str) -> Result<Self, semver::Error> {
        let s = s.trim();
        let s = s
            .strip_prefix('v')
            .or_else(|| s.strip_prefix('V'))
            .unwrap_or(s);
        semver::Version::parse(s).map(Self)
    }

    /// Version of this build, from Cargo.toml
    pub fn current() -> Self {
        let part = |s: &str| s.parse().unwrap_or(0);
        let mut version = semver::Version::new(
            part(env!("CARGO_PKG_VERSION_MAJOR")),
            part(env!("CARGO_PKG_VERSION_MINOR")),
            part(env!("CARGO_PKG_VERSION_PATCH")),
        );
        if let Ok(pre) = semver::Prerelease::new(env!("CARGO_PKG_VERSION_PRE")) {
            version.pre = pre;
        }
        Self(version)
    }

    /// Strictly greater under semver precedence; build metadata is ignored
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self.cmp_precedence(other) == Ordering::Greater
    }

    fn cmp_precedence(&self, other: &Version) -> Ordering {
        (self.0.major, self.0.minor, self.0.patch)
            .cmp(&(other.0.major, other.0.minor, other.0.patch))
            .then_with(|| self.0.pre.cmp(&other.0.pre))
    }

    pub fn inner(&self) -> &semver::Version {
        &self.0
    }
}

impl FromStr for Version {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_precedence(other)
            .then_with(|| self.0.build.cmp(&other.0.build))
    }
}
