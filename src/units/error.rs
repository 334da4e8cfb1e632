//! Error taxonomy for discovery, dependency resolution, lifecycle and hot-swap.
//!
//! Every variant carries the affected unit identifier and whatever else is
//! needed to report the failure without parsing the message.

use std::fmt;

use thiserror::Error;

use super::lifecycle::{HookKind, LifecycleState};
use crate::version::{Version, VersionError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Malformed manifest {id}: {reason}")]
    MalformedManifest { id: String, reason: String },

    #[error("Duplicate unit identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Manifest source {origin} unreadable: {reason}")]
    Source { origin: String, reason: String },
}

impl DiscoveryError {
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::MalformedManifest { id, .. } => Some(id),
            Self::DuplicateIdentifier(id) => Some(id),
            Self::Source { .. } => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("Unit {unit} depends on missing unit {dependency}")]
    Missing { unit: String, dependency: String },

    #[error("Dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Unit {unit} blocked by rejected dependency {blocked_by}")]
    Blocked { unit: String, blocked_by: String },
}

impl DependencyError {
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Missing { unit, .. } | Self::Blocked { unit, .. } => Some(unit),
            Self::Cycle { path } => path.first().map(String::as_str),
        }
    }
}

/// Why an unload was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusyReason {
    /// Live units still declare this unit as a dependency.
    Dependents(Vec<String>),
    /// The unit's `can_unload` returned false.
    Vetoed,
}

impl fmt::Display for BusyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependents(ids) => write!(f, "required by {}", ids.join(", ")),
            Self::Vetoed => write!(f, "unit refused to unload"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Unit not registered: {0}")]
    NotFound(String),

    #[error("Unit {unit}: invalid transition {from} -> {to}")]
    InvalidTransition {
        unit: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Unit {unit}: dependency {dependency} is not active ({})", state.map(|s| s.to_string()).unwrap_or_else(|| "unregistered".into()))]
    DependencyNotActive {
        unit: String,
        dependency: String,
        state: Option<LifecycleState>,
    },

    #[error("Unit {unit} busy: {reason}")]
    Busy { unit: String, reason: BusyReason },

    #[error("Unit {unit}: {hook} hook failed: {reason}")]
    HookFailed {
        unit: String,
        hook: HookKind,
        reason: String,
    },

    #[error("Unit {unit}: {hook} hook timed out after {timeout_ms}ms")]
    Timeout {
        unit: String,
        hook: HookKind,
        timeout_ms: u64,
    },

    #[error("Unit {unit}: no factory can build version {version}")]
    NoFactory { unit: String, version: Version },

    #[error("Unit {unit}: factory failed for {version}: {reason}")]
    Factory {
        unit: String,
        version: Version,
        reason: String,
    },

    #[error("Runtime is shutting down")]
    ShuttingDown,
}

impl LifecycleError {
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::NotFound(unit) => Some(unit),
            Self::InvalidTransition { unit, .. }
            | Self::DependencyNotActive { unit, .. }
            | Self::Busy { unit, .. }
            | Self::HookFailed { unit, .. }
            | Self::Timeout { unit, .. }
            | Self::NoFactory { unit, .. }
            | Self::Factory { unit, .. } => Some(unit),
            Self::ShuttingDown => None,
        }
    }

    /// True for failures raised by the unit's own code (hooks, factory).
    pub fn is_unit_fault(&self) -> bool {
        matches!(self, Self::HookFailed { .. } | Self::Timeout { .. } | Self::Factory { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HotSwapError {
    #[error("Unit {unit}: {from} -> {to} rejected by compatibility rule {rule}")]
    Incompatible {
        unit: String,
        from: Version,
        to: Version,
        rule: String,
    },

    #[error("Unit {0}: swap already in progress")]
    InProgress(String),

    #[error("Unit {unit} is {state}, expected active")]
    NotActive { unit: String, state: LifecycleState },

    #[error("Unit {unit}: version {version} is not available")]
    UnknownVersion { unit: String, version: Version },

    #[error("Unit {unit}: drain timed out with {remaining} delivery(ies) in flight")]
    DrainTimeout { unit: String, remaining: u32 },

    #[error("Unit {unit}: swap cancelled before commit")]
    Cancelled { unit: String },

    #[error("Unit {unit}: swap failed ({cause}) and the previous instance could not be resumed: {reason}")]
    RestoreFailed {
        unit: String,
        cause: String,
        reason: String,
    },

    #[error(transparent)]
    Version(VersionError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl From<VersionError> for HotSwapError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::Incompatible { unit, from, to, rule } => Self::Incompatible { unit, from, to, rule },
            other => Self::Version(other),
        }
    }
}

impl HotSwapError {
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Incompatible { unit, .. }
            | Self::NotActive { unit, .. }
            | Self::UnknownVersion { unit, .. }
            | Self::DrainTimeout { unit, .. }
            | Self::Cancelled { unit }
            | Self::RestoreFailed { unit, .. } => Some(unit),
            Self::InProgress(unit) => Some(unit),
            Self::Version(e) => Some(e.unit()),
            Self::Lifecycle(e) => e.unit(),
        }
    }

    /// True when the swap was refused before the unit was touched.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Incompatible { .. }
            | Self::InProgress(_)
            | Self::NotActive { .. }
            | Self::UnknownVersion { .. }
            | Self::DrainTimeout { .. } => true,
            Self::Version(e) => e.is_rejection(),
            _ => false,
        }
    }
}

/// Failure reported by a unit hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for HookError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for HookError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_shows_path() {
        let err = DependencyError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
        assert_eq!(err.unit(), Some("a"));
    }

    #[test]
    fn test_version_error_conversion() {
        let incompatible = VersionError::Incompatible {
            unit: "a".into(),
            from: Version::new(2, 0, 0),
            to: Version::new(1, 0, 0),
            rule: "no_major_downgrade".into(),
        };
        assert!(matches!(HotSwapError::from(incompatible), HotSwapError::Incompatible { .. }));

        let failed = VersionError::MigrationFailed {
            unit: "a".into(),
            from: Version::new(1, 0, 0),
            to: Version::new(2, 0, 0),
            reason: "bad".into(),
        };
        let err = HotSwapError::from(failed);
        assert!(matches!(err, HotSwapError::Version(VersionError::MigrationFailed { .. })));
        assert!(!err.is_rejection());
        assert_eq!(err.unit(), Some("a"));
    }

    #[test]
    fn test_dependency_not_active_message() {
        let err = LifecycleError::DependencyNotActive {
            unit: "b".into(),
            dependency: "a".into(),
            state: None,
        };
        assert!(err.to_string().contains("unregistered"));
    }
}
