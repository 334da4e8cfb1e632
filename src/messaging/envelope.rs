//! Message envelope exchanged between units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Key/value payload carried by an envelope.
pub type Payload = Map<String, Value>;

/// Source identifier used for messages emitted by the runtime itself.
pub const SYSTEM_SOURCE: &str = "unit-core";

/// Message type tags emitted by the runtime.
pub mod kinds {
    /// Sent to a unit after it reaches `Active` through a load.
    pub const ACTIVATED: &str = "unit.activated";
    /// Sent to active dependents after a unit was hot-swapped.
    pub const SWAPPED: &str = "unit.swapped";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: Uuid,
    pub source: String,
    pub destination: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Payload,
    pub sent_at: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            destination: destination.into(),
            kind: kind.into(),
            payload: Payload::new(),
            sent_at: Utc::now(),
        }
    }

    /// Envelope originating from the runtime.
    pub fn system(destination: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(SYSTEM_SOURCE, destination, kind)
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn is_system(&self) -> bool {
        self.source == SYSTEM_SOURCE
    }
}
