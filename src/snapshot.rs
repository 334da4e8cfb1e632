//! Instance data and backup snapshots.
//!
//! `InstanceData` is the opaque configuration/state carried by a live unit.
//! `ComponentBackup` is the only way the migration pipeline saves and restores
//! it: `capture` before a transform, `restore` if the transform or validation
//! fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::version::Version;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to serialize {part} for {unit}: {source}")]
    Serialize {
        unit: String,
        part: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to restore {part} for {unit}: {source}")]
    Restore {
        unit: String,
        part: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration and runtime state of a unit instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceData {
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(default)]
    pub state: Map<String, Value>,
}

impl InstanceData {
    pub fn with_configuration(configuration: Map<String, Value>) -> Self {
        Self { configuration, state: Map::new() }
    }

    pub fn config(&self, key: &str) -> Option<&Value> {
        self.configuration.get(key)
    }

    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.configuration.is_empty() && self.state.is_empty()
    }
}

/// Serialized copy of a unit's data taken before a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentBackup {
    pub unit: String,
    pub version: Version,
    pub configuration: String,
    pub state: String,
    pub taken_at: DateTime<Utc>,
}

impl ComponentBackup {
    pub fn capture(unit: &str, version: &Version, data: &InstanceData) -> Result<Self, SnapshotError> {
        let serialize = |part: &'static str, map: &Map<String, Value>| {
            serde_json::to_string(map).map_err(|source| SnapshotError::Serialize {
                unit: unit.to_string(),
                part,
                source,
            })
        };

        Ok(Self {
            unit: unit.to_string(),
            version: version.clone(),
            configuration: serialize("configuration", &data.configuration)?,
            state: serialize("state", &data.state)?,
            taken_at: Utc::now(),
        })
    }

    /// Overwrite `data` with the captured contents.
    pub fn restore(&self, data: &mut InstanceData) -> Result<(), SnapshotError> {
        let deserialize = |part: &'static str, raw: &str| {
            serde_json::from_str::<Map<String, Value>>(raw).map_err(|source| SnapshotError::Restore {
                unit: self.unit.clone(),
                part,
                source,
            })
        };

        let configuration = deserialize("configuration", &self.configuration)?;
        let state = deserialize("state", &self.state)?;
        data.configuration = configuration;
        data.state = state;
        Ok(())
    }
}
