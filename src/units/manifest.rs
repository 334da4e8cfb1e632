//! Unit manifest parsing and validation.
//!
//! A manifest is the per-unit metadata document (JSON or TOML) a manifest
//! source yields. Parsing is strict about required fields and lenient about
//! unknown ones.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::error::DiscoveryError;
use crate::version::Version;

/// Manifest document as written by unit authors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Unique unit identifier (e.g., "billing-ledger").
    #[serde(alias = "id")]
    pub identifier: String,
    /// Human-readable name.
    #[serde(alias = "name")]
    pub display_name: String,
    /// Declared semantic version.
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Versions this unit can be swapped to; the declared version is always included.
    #[serde(default, alias = "available_versions")]
    pub versions: Vec<String>,
    /// Default configuration handed to new instances.
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Manifest encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    Json,
    Toml,
}

impl ManifestFormat {
    /// Format implied by a file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

fn identifier_pattern() -> &'static Result<Regex, regex::Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$"))
}

/// Whether `id` is usable as a unit identifier and message destination.
pub fn is_valid_identifier(id: &str) -> bool {
    id.len() <= 128 && matches!(identifier_pattern(), Ok(pattern) if pattern.is_match(id))
}

/// SHA-256 of the raw manifest text, hex encoded.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl UnitManifest {
    /// Parse manifest text. `origin` names the document in errors when the
    /// identifier itself cannot be read.
    pub fn parse(content: &str, format: ManifestFormat, origin: &str) -> Result<Self, DiscoveryError> {
        let parsed = match format {
            ManifestFormat::Json => serde_json::from_str::<Self>(content).map_err(|e| e.to_string()),
            ManifestFormat::Toml => toml::from_str::<Self>(content).map_err(|e| e.to_string()),
        };
        let manifest = parsed.map_err(|reason| DiscoveryError::MalformedManifest {
            id: salvage_identifier(content, format).unwrap_or_else(|| origin.to_string()),
            reason,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_json(content: &str) -> Result<Self, DiscoveryError> {
        Self::parse(content, ManifestFormat::Json, "<json>")
    }

    pub fn from_toml(content: &str) -> Result<Self, DiscoveryError> {
        Self::parse(content, ManifestFormat::Toml, "<toml>")
    }

    /// Validate field contents beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let malformed = |reason: String| DiscoveryError::MalformedManifest {
            id: self.identifier.clone(),
            reason,
        };

        if !is_valid_identifier(&self.identifier) {
            return Err(malformed(format!("invalid identifier {:?}", self.identifier)));
        }
        if self.display_name.trim().is_empty() {
            return Err(malformed("display name cannot be empty".into()));
        }
        self.declared_version()
            .map_err(|e| malformed(format!("version {:?}: {}", self.version, e)))?;
        for dependency in &self.dependencies {
            if !is_valid_identifier(dependency) {
                return Err(malformed(format!("invalid dependency identifier {:?}", dependency)));
            }
        }
        for raw in &self.versions {
            Version::parse(raw).map_err(|e| malformed(format!("available version {:?}: {}", raw, e)))?;
        }
        Ok(())
    }

    pub fn declared_version(&self) -> Result<Version, crate::version::VersionParseError> {
        Version::parse(&self.version)
    }
}

/// Best-effort read of the identifier from a document that failed to parse.
fn salvage_identifier(content: &str, format: ManifestFormat) -> Option<String> {
    let value: Value = match format {
        ManifestFormat::Json => serde_json::from_str(content).ok()?,
        ManifestFormat::Toml => toml::from_str::<Value>(content).ok()?,
    };
    value
        .get("identifier")
        .or_else(|| value.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
