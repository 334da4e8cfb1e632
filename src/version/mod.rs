//! Version management for units.
//!
//! Semantic versions, compatibility classification and rules, migration
//! dispatch (specific strategies or the generic pipeline), and the
//! append-only history ledger.

mod compat;
mod error;
mod history;
mod manager;
mod migration;
mod semver;

pub use compat::{
    default_rules, CompatibilityLevel, CompatibilityRule, FnRule, NoMajorDowngrade, NoMinorDowngrade,
    PrereleaseSameMinor,
};
pub use error::VersionError;
pub use history::{ChangeType, VersionHistory, VersionHistoryEntry};
pub use manager::{MigrationPolicy, VersionManager};
pub use migration::{
    AcceptAll, DefaultMigrationHooks, MigrationHooks, MigrationOutcome, MigrationPath, MigrationStrategy,
    MigrationValidator,
};
pub use semver::{latest_stable_version, Version, VersionParseError};
