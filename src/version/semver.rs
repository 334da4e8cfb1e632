//! Semantic version value type.
//!
//! Ordering is major, minor, patch, then prerelease. A version carrying a
//! prerelease label sorts before the same version without one, and prerelease
//! labels compare lexicographically. Build metadata never takes part in
//! equality, ordering or hashing.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("Version string is empty")]
    Empty,

    #[error("Expected MAJOR.MINOR.PATCH, found {0} component(s)")]
    ComponentCount(usize),

    #[error("Invalid {component} component: {value:?}")]
    InvalidComponent { component: &'static str, value: String },

    #[error("Invalid {part} label: {value:?}")]
    InvalidLabel { part: &'static str, value: String },
}

/// Immutable semantic version.
#[derive(Debug, Clone)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: Option<String>,
    build: Option<String>,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch, prerelease: None, build: None }
    }

    /// Same version with the given prerelease label.
    pub fn with_prerelease(mut self, label: impl Into<String>) -> Result<Self, VersionParseError> {
        let label = label.into();
        validate_label("prerelease", &label)?;
        self.prerelease = Some(label);
        Ok(self)
    }

    /// Same version with the given build metadata.
    pub fn with_build(mut self, build: impl Into<String>) -> Result<Self, VersionParseError> {
        let build = build.into();
        validate_label("build", &build)?;
        self.build = Some(build);
        Ok(self)
    }

    /// Parse `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`, with an optional leading `v`.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (trimmed, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::ComponentCount(parts.len()));
        }

        let mut version = Self::new(
            parse_component("major", parts[0])?,
            parse_component("minor", parts[1])?,
            parse_component("patch", parts[2])?,
        );
        if let Some(pre) = prerelease {
            version = version.with_prerelease(pre)?;
        }
        if let Some(build) = build {
            version = version.with_build(build)?;
        }
        Ok(version)
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn prerelease(&self) -> Option<&str> {
        self.prerelease.as_deref()
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// True when the version has no prerelease label.
    pub fn is_stable(&self) -> bool {
        self.prerelease.is_none()
    }

    /// True when major, minor and patch all match.
    pub fn same_release(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor && self.patch == other.patch
    }
}

fn parse_component(component: &'static str, value: &str) -> Result<u64, VersionParseError> {
    let invalid = || VersionParseError::InvalidComponent {
        component,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    // No leading zeros except for a bare "0".
    if value.len() > 1 && value.starts_with('0') {
        return Err(invalid());
    }
    value.parse::<u64>().map_err(|_| invalid())
}

fn validate_label(part: &'static str, value: &str) -> Result<(), VersionParseError> {
    let valid = !value.is_empty()
        && value
            .split('.')
            .all(|ident| !ident.is_empty() && ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'));
    if valid {
        Ok(())
    } else {
        Err(VersionParseError::InvalidLabel { part, value: value.to_string() })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Greatest version without a prerelease label.
pub fn latest_stable_version<'a, I>(versions: I) -> Option<Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    versions.into_iter().filter(|v| v.is_stable()).max().cloned()
}
