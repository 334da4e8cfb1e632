//! Version manager: compatibility policy, migration dispatch and history.
//!
//! Constructed explicitly and shared by reference (`Arc`) with the registry
//! and the hot-swap coordinator.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::compat::{default_rules, CompatibilityLevel, CompatibilityRule, NoMinorDowngrade};
use super::error::VersionError;
use super::history::{ChangeType, VersionHistory, VersionHistoryEntry};
use super::migration::{
    run_generic, DefaultMigrationHooks, MigrationHooks, MigrationOutcome, MigrationPath,
    MigrationStrategy, MigrationValidator,
};
use super::semver::{latest_stable_version, Version};
use crate::snapshot::{ComponentBackup, InstanceData};

/// Migration policy knobs.
#[derive(Debug, Clone)]
pub struct MigrationPolicy {
    /// Allow the generic pipeline to handle breaking transitions.
    pub generic_breaking: bool,
    /// Install `NoMinorDowngrade` alongside the default rules.
    pub strict_minor_downgrade: bool,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            generic_breaking: true,
            strict_minor_downgrade: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StrategyKey {
    unit: Option<String>,
    from: Version,
    to: Version,
}

pub struct VersionManager {
    rules: RwLock<Vec<Arc<dyn CompatibilityRule>>>,
    strategies: RwLock<HashMap<StrategyKey, Arc<dyn MigrationStrategy>>>,
    hooks: Arc<dyn MigrationHooks>,
    history: VersionHistory,
    policy: MigrationPolicy,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::with_policy(MigrationPolicy::default())
    }

    pub fn with_policy(policy: MigrationPolicy) -> Self {
        let mut rules = default_rules();
        if policy.strict_minor_downgrade {
            rules.push(Arc::new(NoMinorDowngrade));
        }
        Self {
            rules: RwLock::new(rules),
            strategies: RwLock::new(HashMap::new()),
            hooks: Arc::new(DefaultMigrationHooks),
            history: VersionHistory::new(),
            policy,
        }
    }

    /// Replace the generic transform hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn MigrationHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_rule(self, rule: Arc<dyn CompatibilityRule>) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn add_rule(&self, rule: Arc<dyn CompatibilityRule>) {
        debug!(rule = rule.name(), "compatibility rule added");
        self.rules.write().push(rule);
    }

    /// Remove every rule, making all transitions compatible.
    pub fn clear_rules(&self) {
        self.rules.write().clear();
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name().to_string()).collect()
    }

    pub fn policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    /// Register a strategy for `from -> to`, applying to every unit.
    pub fn register_strategy(&self, from: Version, to: Version, strategy: Arc<dyn MigrationStrategy>) {
        self.strategies.write().insert(StrategyKey { unit: None, from, to }, strategy);
    }

    /// Register a strategy for `from -> to` on a single unit. Takes precedence
    /// over a unit-agnostic strategy for the same pair.
    pub fn register_unit_strategy(
        &self,
        unit: &str,
        from: Version,
        to: Version,
        strategy: Arc<dyn MigrationStrategy>,
    ) {
        let key = StrategyKey {
            unit: Some(unit.to_string()),
            from,
            to,
        };
        self.strategies.write().insert(key, strategy);
    }

    fn strategy_for(&self, unit: &str, from: &Version, to: &Version) -> Option<Arc<dyn MigrationStrategy>> {
        let strategies = self.strategies.read();
        let specific = StrategyKey {
            unit: Some(unit.to_string()),
            from: from.clone(),
            to: to.clone(),
        };
        if let Some(strategy) = strategies.get(&specific) {
            return Some(Arc::clone(strategy));
        }
        let generic = StrategyKey {
            unit: None,
            from: from.clone(),
            to: to.clone(),
        };
        strategies.get(&generic).map(Arc::clone)
    }

    pub fn compare(&self, a: &Version, b: &Version) -> Ordering {
        a.cmp(b)
    }

    pub fn compatibility_level(&self, from: &Version, to: &Version) -> CompatibilityLevel {
        CompatibilityLevel::between(from, to)
    }

    pub fn are_compatible(&self, from: &Version, to: &Version) -> bool {
        self.rules.read().iter().all(|rule| rule.accepts(from, to))
    }

    /// Like `are_compatible`, naming the first rule that rejects.
    pub fn check_compatibility(&self, unit: &str, from: &Version, to: &Version) -> Result<(), VersionError> {
        let rules = self.rules.read();
        match rules.iter().find(|rule| !rule.accepts(from, to)) {
            Some(rule) => Err(VersionError::Incompatible {
                unit: unit.to_string(),
                from: from.clone(),
                to: to.clone(),
                rule: rule.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Carry `data` from `from` to `to`.
    ///
    /// A backup is captured first; if the transform or validation fails,
    /// `data` is restored before the error is returned.
    pub fn migrate<V>(
        &self,
        unit: &str,
        data: &mut InstanceData,
        validator: &V,
        from: &Version,
        to: &Version,
    ) -> Result<MigrationOutcome, VersionError>
    where
        V: MigrationValidator + ?Sized,
    {
        let level = self.compatibility_level(from, to);
        if from == to {
            return Ok(MigrationOutcome {
                from: from.clone(),
                to: to.clone(),
                level,
                path: MigrationPath::Skipped,
            });
        }

        self.check_compatibility(unit, from, to)?;

        let failed = |reason: String| VersionError::MigrationFailed {
            unit: unit.to_string(),
            from: from.clone(),
            to: to.clone(),
            reason,
        };

        let strategy = self.strategy_for(unit, from, to);
        if strategy.is_none() && level == CompatibilityLevel::Breaking && !self.policy.generic_breaking {
            return Err(VersionError::NoMigrationPath {
                unit: unit.to_string(),
                from: from.clone(),
                to: to.clone(),
                level,
            });
        }

        let backup = ComponentBackup::capture(unit, from, data).map_err(|e| failed(e.to_string()))?;

        let transformed = match &strategy {
            Some(strategy) => strategy.migrate(data, from, to).map(|_| MigrationPath::Strategy),
            None => run_generic(self.hooks.as_ref(), level, data, from, to).map(|_| MigrationPath::Generic(level)),
        };

        let result = transformed
            .and_then(|path| validator.validate(data, to).map(|_| path))
            .map_err(|reason| {
                if let Err(e) = backup.restore(data) {
                    warn!(unit, error = %e, "backup restore failed after migration error");
                }
                failed(reason)
            });

        match result {
            Ok(path) => {
                info!(unit, %from, %to, %level, ?path, "migration complete");
                Ok(MigrationOutcome {
                    from: from.clone(),
                    to: to.clone(),
                    level,
                    path,
                })
            }
            Err(e) => {
                warn!(unit, %from, %to, error = %e, "migration failed, data restored");
                Err(e)
            }
        }
    }

    /// Validate a rollback request without performing it.
    pub fn check_rollback(&self, unit: &str, current: &Version, target: &Version) -> Result<(), VersionError> {
        if target >= current {
            return Err(VersionError::InvalidRollback {
                unit: unit.to_string(),
                current: current.clone(),
                target: target.clone(),
            });
        }
        if !self.history.contains_version(unit, target) {
            return Err(VersionError::VersionNotFound {
                unit: unit.to_string(),
                version: target.clone(),
            });
        }
        Ok(())
    }

    /// Roll `unit` back to a version it previously ran.
    ///
    /// The current version is the latest history entry. On success a
    /// `Rollback` entry is appended.
    pub fn rollback<V>(
        &self,
        unit: &str,
        data: &mut InstanceData,
        validator: &V,
        target: &Version,
    ) -> Result<MigrationOutcome, VersionError>
    where
        V: MigrationValidator + ?Sized,
    {
        let current = self.current_version(unit).ok_or_else(|| VersionError::VersionNotFound {
            unit: unit.to_string(),
            version: target.clone(),
        })?;
        self.check_rollback(unit, &current, target)?;

        let outcome = self.migrate(unit, data, validator, &current, target)?;
        self.record(unit, target.clone(), Some(current), ChangeType::Rollback, BTreeMap::new());
        Ok(outcome)
    }

    pub fn record(
        &self,
        unit: &str,
        version: Version,
        previous: Option<Version>,
        change: ChangeType,
        metadata: BTreeMap<String, String>,
    ) -> VersionHistoryEntry {
        let entry = self.history.append(unit, version, previous, change, metadata);
        debug!(unit, version = %entry.version, change = %entry.change, "history entry appended");
        entry
    }

    pub fn history(&self, unit: &str) -> Vec<VersionHistoryEntry> {
        self.history.entries(unit)
    }

    pub fn current_version(&self, unit: &str) -> Option<Version> {
        self.history.latest(unit).map(|entry| entry.version)
    }

    pub fn has_history(&self, unit: &str) -> bool {
        self.history.len(unit) > 0
    }

    pub fn latest_stable_version(&self, versions: &[Version]) -> Option<Version> {
        latest_stable_version(versions)
    }
}

impl Default for VersionManager {
    fn default() -> Self {
        Self::new()
    }
}
