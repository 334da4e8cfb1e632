//! Unit discovery from manifest sources.
//!
//! A [`ManifestSource`] yields raw manifest documents; [`UnitDiscovery`] parses
//! them into descriptors, enforcing identifier uniqueness. `discover` fails on
//! the first bad manifest; `scan` keeps going and reports every problem.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::descriptor::UnitDescriptor;
use super::error::DiscoveryError;
use super::manifest::{content_digest, ManifestFormat, UnitManifest};

/// One manifest document as read from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    /// File path or label identifying the document.
    pub origin: String,
    pub format: ManifestFormat,
    pub content: String,
}

impl RawManifest {
    pub fn json(origin: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            format: ManifestFormat::Json,
            content: content.into(),
        }
    }

    pub fn toml(origin: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            format: ManifestFormat::Toml,
            content: content.into(),
        }
    }
}

/// Yields manifest documents. Failing to read the source as a whole is an
/// error; individual bad documents are for the caller to judge.
pub trait ManifestSource: Send + Sync {
    fn name(&self) -> String;

    fn manifests(&self) -> Result<Vec<RawManifest>, DiscoveryError>;
}

/// Reads `*.json` and `*.toml` manifests from a directory and its immediate
/// subdirectories (one unit per subdirectory is the usual layout).
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_error(&self, path: &Path, err: std::io::Error) -> DiscoveryError {
        DiscoveryError::Source {
            origin: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    fn collect(&self, dir: &Path, depth: usize, out: &mut Vec<PathBuf>) -> Result<(), DiscoveryError> {
        let entries = fs::read_dir(dir).map_err(|e| self.source_error(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| self.source_error(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| self.source_error(&path, e))?;
            if file_type.is_dir() {
                if depth == 0 {
                    self.collect(&path, depth + 1, out)?;
                }
            } else if ManifestFormat::from_path(&path).is_some() {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl ManifestSource for DirectorySource {
    fn name(&self) -> String {
        format!("dir:{}", self.root.display())
    }

    fn manifests(&self) -> Result<Vec<RawManifest>, DiscoveryError> {
        let mut paths = Vec::new();
        self.collect(&self.root, 0, &mut paths)?;
        paths.sort();

        let mut manifests = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(format) = ManifestFormat::from_path(&path) else {
                continue;
            };
            let content = fs::read_to_string(&path).map_err(|e| self.source_error(&path, e))?;
            manifests.push(RawManifest {
                origin: path.display().to_string(),
                format,
                content,
            });
        }
        Ok(manifests)
    }
}

/// Fixed set of manifests held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    manifests: Vec<RawManifest>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, manifest: RawManifest) -> Self {
        self.manifests.push(manifest);
        self
    }

    pub fn push(&mut self, manifest: RawManifest) {
        self.manifests.push(manifest);
    }
}

impl ManifestSource for StaticSource {
    fn name(&self) -> String {
        "static".into()
    }

    fn manifests(&self) -> Result<Vec<RawManifest>, DiscoveryError> {
        Ok(self.manifests.clone())
    }
}

/// Outcome of a lenient scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Valid descriptors with unique identifiers, ascending by identifier.
    pub descriptors: Vec<UnitDescriptor>,
    /// Problems found, in source order.
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<DiscoveryError>,
}

fn serialize_errors<S: serde::Serializer>(errors: &[DiscoveryError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

impl DiscoveryReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.descriptors.iter().map(UnitDescriptor::id).collect()
    }
}

/// Turns a manifest source into unit descriptors.
pub struct UnitDiscovery {
    source: Arc<dyn ManifestSource>,
}

impl UnitDiscovery {
    pub fn new(source: Arc<dyn ManifestSource>) -> Self {
        Self { source }
    }

    pub fn from_dir(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectorySource::new(root)))
    }

    pub fn source_name(&self) -> String {
        self.source.name()
    }

    /// Descriptors for every manifest, ascending by identifier. Fails on the
    /// first malformed manifest or duplicated identifier.
    pub fn discover(&self) -> Result<Vec<UnitDescriptor>, DiscoveryError> {
        let report = self.scan()?;
        match report.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(report.descriptors),
        }
    }

    /// Parse everything the source yields, collecting per-manifest problems.
    /// Every copy of a duplicated identifier is excluded.
    pub fn scan(&self) -> Result<DiscoveryReport, DiscoveryError> {
        let raw = self.source.manifests()?;
        debug!(source = %self.source.name(), documents = raw.len(), "scanning manifests");

        let mut errors = Vec::new();
        let mut by_id: BTreeMap<String, Vec<UnitDescriptor>> = BTreeMap::new();
        for manifest in raw {
            match parse_descriptor(&manifest) {
                Ok(descriptor) => by_id.entry(descriptor.id().to_string()).or_default().push(descriptor),
                Err(err) => {
                    warn!(origin = %manifest.origin, error = %err, "manifest rejected");
                    errors.push(err);
                }
            }
        }

        let mut descriptors = Vec::with_capacity(by_id.len());
        for (id, mut found) in by_id {
            if found.len() > 1 {
                let origins: Vec<&str> = found.iter().map(UnitDescriptor::origin).collect();
                warn!(unit = %id, origins = ?origins, "duplicate identifier");
                errors.push(DiscoveryError::DuplicateIdentifier(id));
            } else if let Some(descriptor) = found.pop() {
                descriptors.push(descriptor);
            }
        }

        info!(
            source = %self.source.name(),
            units = descriptors.len(),
            errors = errors.len(),
            "discovery complete"
        );
        Ok(DiscoveryReport { descriptors, errors })
    }
}

fn parse_descriptor(raw: &RawManifest) -> Result<UnitDescriptor, DiscoveryError> {
    let manifest = UnitManifest::parse(&raw.content, raw.format, &raw.origin)?;
    UnitDescriptor::from_manifest(manifest, &raw.origin, content_digest(&raw.content))
}
