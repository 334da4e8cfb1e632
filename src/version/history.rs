//! Append-only version history ledger.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::compat::CompatibilityLevel;
use super::semver::Version;

/// Kind of version change recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Creation,
    Upgrade,
    Downgrade,
    Migration,
    Rollback,
    Patch,
}

impl ChangeType {
    /// Classify a hot-swap from `from` to `to`.
    pub fn for_transition(from: &Version, to: &Version) -> Self {
        if to > from {
            if CompatibilityLevel::between(from, to) == CompatibilityLevel::Patch {
                Self::Patch
            } else {
                Self::Upgrade
            }
        } else if to < from {
            Self::Downgrade
        } else {
            Self::Migration
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creation => write!(f, "creation"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Downgrade => write!(f, "downgrade"),
            Self::Migration => write!(f, "migration"),
            Self::Rollback => write!(f, "rollback"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

/// One immutable ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub unit: String,
    pub version: Version,
    pub previous: Option<Version>,
    pub change: ChangeType,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

/// Per-unit append-only history.
///
/// Timestamps within a unit never go backwards: if the wall clock does, the
/// entry reuses the previous timestamp.
pub struct VersionHistory {
    entries: RwLock<HashMap<String, Vec<VersionHistoryEntry>>>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn append(
        &self,
        unit: &str,
        version: Version,
        previous: Option<Version>,
        change: ChangeType,
        metadata: BTreeMap<String, String>,
    ) -> VersionHistoryEntry {
        let mut entries = self.entries.write();
        let log = entries.entry(unit.to_string()).or_default();

        let now = Utc::now();
        let timestamp = match log.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let entry = VersionHistoryEntry {
            unit: unit.to_string(),
            version,
            previous,
            change,
            timestamp,
            metadata,
        };
        log.push(entry.clone());
        entry
    }

    pub fn entries(&self, unit: &str) -> Vec<VersionHistoryEntry> {
        self.entries.read().get(unit).cloned().unwrap_or_default()
    }

    pub fn latest(&self, unit: &str) -> Option<VersionHistoryEntry> {
        self.entries.read().get(unit).and_then(|log| log.last().cloned())
    }

    /// True if `version` was ever recorded for `unit`, as current or previous.
    pub fn contains_version(&self, unit: &str, version: &Version) -> bool {
        self.entries.read().get(unit).is_some_and(|log| {
            log.iter()
                .any(|e| &e.version == version || e.previous.as_ref() == Some(version))
        })
    }

    pub fn len(&self, unit: &str) -> usize {
        self.entries.read().get(unit).map_or(0, Vec::len)
    }

    pub fn units(&self) -> Vec<String> {
        let mut units: Vec<String> = self.entries.read().keys().cloned().collect();
        units.sort();
        units
    }
}

impl Default for VersionHistory {
    fn default() -> Self {
        Self::new()
    }
}
