//! Compatibility classification and policy rules.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::semver::Version;

/// Relationship between a source and a target version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityLevel {
    /// Same release, differing at most in prerelease or build metadata.
    Identical,
    /// Only the patch number differs.
    Patch,
    /// Same major, newer minor.
    Backward,
    /// Same major, older minor.
    Forward,
    /// Major versions differ.
    Breaking,
}

impl CompatibilityLevel {
    pub fn between(from: &Version, to: &Version) -> Self {
        if from.major() != to.major() {
            Self::Breaking
        } else if to.minor() > from.minor() {
            Self::Backward
        } else if to.minor() < from.minor() {
            Self::Forward
        } else if to.patch() != from.patch() {
            Self::Patch
        } else {
            Self::Identical
        }
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identical => write!(f, "identical"),
            Self::Patch => write!(f, "patch"),
            Self::Backward => write!(f, "backward"),
            Self::Forward => write!(f, "forward"),
            Self::Breaking => write!(f, "breaking"),
        }
    }
}

/// A single accept/reject predicate over a version transition.
///
/// A transition is compatible only when every registered rule accepts it.
pub trait CompatibilityRule: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, from: &Version, to: &Version) -> bool;
}

/// Rejects transitions that lower the major version.
pub struct NoMajorDowngrade;

impl CompatibilityRule for NoMajorDowngrade {
    fn name(&self) -> &str {
        "no_major_downgrade"
    }

    fn accepts(&self, from: &Version, to: &Version) -> bool {
        to.major() >= from.major()
    }
}

/// Prerelease versions only interoperate within the same major.minor line.
pub struct PrereleaseSameMinor;

impl CompatibilityRule for PrereleaseSameMinor {
    fn name(&self) -> &str {
        "prerelease_same_minor"
    }

    fn accepts(&self, from: &Version, to: &Version) -> bool {
        if from.is_stable() && to.is_stable() {
            return true;
        }
        from.major() == to.major() && from.minor() == to.minor()
    }
}

/// Rejects transitions that lower the minor version within a major line.
///
/// Not part of the default set.
pub struct NoMinorDowngrade;

impl CompatibilityRule for NoMinorDowngrade {
    fn name(&self) -> &str {
        "no_minor_downgrade"
    }

    fn accepts(&self, from: &Version, to: &Version) -> bool {
        from.major() != to.major() || to.minor() >= from.minor()
    }
}

/// Rule backed by a closure.
pub struct FnRule<F> {
    name: String,
    check: F,
}

impl<F> FnRule<F>
where
    F: Fn(&Version, &Version) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self { name: name.into(), check }
    }
}

impl<F> CompatibilityRule for FnRule<F>
where
    F: Fn(&Version, &Version) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, from: &Version, to: &Version) -> bool {
        (self.check)(from, to)
    }
}

pub fn default_rules() -> Vec<Arc<dyn CompatibilityRule>> {
    vec![Arc::new(NoMajorDowngrade), Arc::new(PrereleaseSameMinor)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_levels() {
        assert_eq!(CompatibilityLevel::between(&v("1.0.0"), &v("2.0.0")), CompatibilityLevel::Breaking);
        assert_eq!(CompatibilityLevel::between(&v("2.0.0"), &v("1.9.9")), CompatibilityLevel::Breaking);
        assert_eq!(CompatibilityLevel::between(&v("1.0.0"), &v("1.1.0")), CompatibilityLevel::Backward);
        assert_eq!(CompatibilityLevel::between(&v("1.3.0"), &v("1.1.5")), CompatibilityLevel::Forward);
        assert_eq!(CompatibilityLevel::between(&v("1.1.0"), &v("1.1.4")), CompatibilityLevel::Patch);
        assert_eq!(
            CompatibilityLevel::between(&v("1.1.0-rc.1"), &v("1.1.0+b2")),
            CompatibilityLevel::Identical
        );
    }

    #[test]
    fn test_no_major_downgrade() {
        assert!(NoMajorDowngrade.accepts(&v("1.0.0"), &v("2.0.0")));
        assert!(NoMajorDowngrade.accepts(&v("1.5.0"), &v("1.0.0")));
        assert!(!NoMajorDowngrade.accepts(&v("2.0.0"), &v("1.9.0")));
    }

    #[test]
    fn test_prerelease_same_minor() {
        assert!(PrereleaseSameMinor.accepts(&v("1.2.0-alpha"), &v("1.2.3")));
        assert!(!PrereleaseSameMinor.accepts(&v("1.2.0-alpha"), &v("1.3.0")));
        assert!(!PrereleaseSameMinor.accepts(&v("1.2.0"), &v("2.0.0-rc.1")));
        assert!(PrereleaseSameMinor.accepts(&v("1.2.0"), &v("3.0.0")));
    }

    #[test]
    fn test_fn_rule() {
        let rule = FnRule::new("even_patch", |_: &Version, to: &Version| to.patch() % 2 == 0);
        assert_eq!(rule.name(), "even_patch");
        assert!(rule.accepts(&v("1.0.0"), &v("1.0.2")));
        assert!(!rule.accepts(&v("1.0.0"), &v("1.0.3")));
    }
}
