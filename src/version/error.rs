//! Version management errors.

use thiserror::Error;

use super::compat::CompatibilityLevel;
use super::semver::Version;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Unit {unit}: {from} -> {to} rejected by compatibility rule {rule}")]
    Incompatible {
        unit: String,
        from: Version,
        to: Version,
        rule: String,
    },

    #[error("Unit {unit}: version {version} not found")]
    VersionNotFound { unit: String, version: Version },

    #[error("Unit {unit}: migration {from} -> {to} failed: {reason}")]
    MigrationFailed {
        unit: String,
        from: Version,
        to: Version,
        reason: String,
    },

    #[error("Unit {unit}: cannot roll back from {current} to {target}")]
    InvalidRollback {
        unit: String,
        current: Version,
        target: Version,
    },

    #[error("Unit {unit}: no migration path {from} -> {to} ({level})")]
    NoMigrationPath {
        unit: String,
        from: Version,
        to: Version,
        level: CompatibilityLevel,
    },
}

impl VersionError {
    pub fn unit(&self) -> &str {
        match self {
            Self::Incompatible { unit, .. }
            | Self::VersionNotFound { unit, .. }
            | Self::MigrationFailed { unit, .. }
            | Self::InvalidRollback { unit, .. }
            | Self::NoMigrationPath { unit, .. } => unit,
        }
    }

    /// Returns true if the request itself was invalid (nothing was attempted).
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::MigrationFailed { .. })
    }
}
