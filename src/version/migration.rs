//! Migration strategies and the generic transform hooks.

use tracing::debug;

use super::compat::CompatibilityLevel;
use super::semver::Version;
use crate::snapshot::InstanceData;

/// Carries instance data across one specific version transition.
pub trait MigrationStrategy: Send + Sync {
    fn migrate(&self, data: &mut InstanceData, from: &Version, to: &Version) -> Result<(), String>;
}

impl<F> MigrationStrategy for F
where
    F: Fn(&mut InstanceData, &Version, &Version) -> Result<(), String> + Send + Sync,
{
    fn migrate(&self, data: &mut InstanceData, from: &Version, to: &Version) -> Result<(), String> {
        self(data, from, to)
    }
}

/// Transform hooks used by the generic pipeline when no strategy is registered.
///
/// One hook per compatibility level; `Identical` never reaches a hook.
pub trait MigrationHooks: Send + Sync {
    fn breaking(&self, data: &mut InstanceData, from: &Version, to: &Version) -> Result<(), String> {
        // State layout is not guaranteed across majors; configuration is kept.
        debug!(%from, %to, dropped = data.state.len(), "breaking migration discards state");
        data.state.clear();
        Ok(())
    }

    fn backward(&self, _data: &mut InstanceData, from: &Version, to: &Version) -> Result<(), String> {
        debug!(%from, %to, "backward migration keeps data");
        Ok(())
    }

    fn forward(&self, _data: &mut InstanceData, from: &Version, to: &Version) -> Result<(), String> {
        debug!(%from, %to, "forward migration keeps data");
        Ok(())
    }

    fn patch(&self, _data: &mut InstanceData, _from: &Version, _to: &Version) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMigrationHooks;

impl MigrationHooks for DefaultMigrationHooks {}

/// Checks migrated data before it is accepted.
pub trait MigrationValidator {
    fn validate(&self, data: &InstanceData, version: &Version) -> Result<(), String>;
}

/// Accepts every result.
pub struct AcceptAll;

impl MigrationValidator for AcceptAll {
    fn validate(&self, _data: &InstanceData, _version: &Version) -> Result<(), String> {
        Ok(())
    }
}

/// How a migration was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPath {
    /// Source and target were equal.
    Skipped,
    /// A registered strategy handled the transition.
    Strategy,
    /// The generic pipeline ran the hook for this level.
    Generic(CompatibilityLevel),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: Version,
    pub to: Version,
    pub level: CompatibilityLevel,
    pub path: MigrationPath,
}

pub(crate) fn run_generic(
    hooks: &dyn MigrationHooks,
    level: CompatibilityLevel,
    data: &mut InstanceData,
    from: &Version,
    to: &Version,
) -> Result<(), String> {
    match level {
        CompatibilityLevel::Breaking => hooks.breaking(data, from, to),
        CompatibilityLevel::Backward => hooks.backward(data, from, to),
        CompatibilityLevel::Forward => hooks.forward(data, from, to),
        CompatibilityLevel::Patch => hooks.patch(data, from, to),
        CompatibilityLevel::Identical => Ok(()),
    }
}
