//! Immutable description of a discovered unit.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

use super::error::DiscoveryError;
use super::manifest::{content_digest, UnitManifest};
use crate::version::Version;

/// What discovery knows about a unit. Never changes once built; a changed
/// manifest yields a new descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitDescriptor {
    id: String,
    display_name: String,
    version: Version,
    dependencies: BTreeSet<String>,
    capabilities: BTreeSet<String>,
    available_versions: Vec<Version>,
    default_config: Map<String, Value>,
    description: Option<String>,
    origin: String,
    digest: String,
}

impl UnitDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, version: Version) -> Self {
        let id = id.into();
        Self {
            digest: content_digest(&id),
            origin: "<memory>".into(),
            id,
            display_name: display_name.into(),
            available_versions: vec![version.clone()],
            version,
            dependencies: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            default_config: Map::new(),
            description: None,
        }
    }

    /// Build from a validated manifest.
    pub fn from_manifest(manifest: UnitManifest, origin: &str, digest: String) -> Result<Self, DiscoveryError> {
        manifest.validate()?;
        let version = manifest
            .declared_version()
            .map_err(|e| DiscoveryError::MalformedManifest {
                id: manifest.identifier.clone(),
                reason: e.to_string(),
            })?;
        let mut extra = Vec::with_capacity(manifest.versions.len());
        for raw in &manifest.versions {
            extra.push(Version::parse(raw).map_err(|e| DiscoveryError::MalformedManifest {
                id: manifest.identifier.clone(),
                reason: e.to_string(),
            })?);
        }

        let mut descriptor = Self::new(manifest.identifier, manifest.display_name, version)
            .with_versions(extra)
            .with_config(manifest.config);
        descriptor.dependencies = manifest.dependencies.into_iter().collect();
        descriptor.capabilities = manifest.capabilities.into_iter().collect();
        descriptor.description = manifest.description;
        descriptor.origin = origin.to_string();
        descriptor.digest = digest;
        Ok(descriptor)
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Add swap targets. The list stays sorted and contains the declared version.
    pub fn with_versions(mut self, versions: impl IntoIterator<Item = Version>) -> Self {
        self.available_versions.extend(versions);
        self.available_versions.sort();
        self.available_versions.dedup();
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.default_config = config;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Identifiers this unit requires, ascending.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.contains(id)
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// Versions the unit can run, ascending.
    pub fn available_versions(&self) -> &[Version] {
        &self.available_versions
    }

    pub fn offers(&self, version: &Version) -> bool {
        self.available_versions.iter().any(|v| v == version)
    }

    pub fn default_config(&self) -> &Map<String, Value> {
        &self.default_config
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Where the manifest came from (path or source label).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// SHA-256 of the manifest text.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_versions_include_declared() {
        let descriptor = UnitDescriptor::new("a", "A", Version::new(1, 0, 0))
            .with_versions([Version::new(2, 0, 0), Version::new(1, 0, 0), Version::new(1, 1, 0)]);
        assert_eq!(
            descriptor.available_versions(),
            &[Version::new(1, 0, 0), Version::new(1, 1, 0), Version::new(2, 0, 0)]
        );
        assert!(descriptor.offers(&Version::new(1, 1, 0)));
        assert!(!descriptor.offers(&Version::new(3, 0, 0)));
    }

    #[test]
    fn test_from_manifest() {
        let manifest = UnitManifest::from_json(
            r#"{"identifier": "b", "display_name": "B", "version": "1.0.0",
                "dependencies": ["z", "a"], "versions": ["1.1.0"]}"#,
        )
        .unwrap();
        let descriptor = UnitDescriptor::from_manifest(manifest, "b.json", "00".into()).unwrap();
        let deps: Vec<_> = descriptor.dependencies().iter().cloned().collect();
        assert_eq!(deps, vec!["a", "z"]);
        assert_eq!(descriptor.available_versions().len(), 2);
        assert_eq!(descriptor.origin(), "b.json");
    }
}
