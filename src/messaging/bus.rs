//! Synchronous, at-most-once message delivery between units.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::drain::{DrainError, FlightTracker};
use super::envelope::{MessageEnvelope, Payload};
use crate::telemetry;

/// Error returned by a handler for a single delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Unknown destination {destination} for {kind}")]
    UnknownDestination { destination: String, kind: String },

    #[error("Destination {destination} unavailable: {reason}")]
    Unavailable { destination: String, reason: String },

    #[error("Handler {destination} failed on {kind}: {reason}")]
    HandlerFailed {
        destination: String,
        kind: String,
        reason: String,
    },

    #[error("Handler {destination} timed out on {kind} after {timeout_ms}ms")]
    Timeout {
        destination: String,
        kind: String,
        timeout_ms: u64,
    },
}

impl DeliveryError {
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::InvalidEnvelope(_) => None,
            Self::UnknownDestination { destination, .. }
            | Self::Unavailable { destination, .. }
            | Self::HandlerFailed { destination, .. }
            | Self::Timeout { destination, .. } => Some(destination),
        }
    }
}

/// Receives envelopes addressed to one identifier.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<Option<Payload>, HandlerError>;
}

/// Routes envelopes to handlers by destination identifier.
///
/// `send` returns after the destination's handler returns. Nothing is
/// retried or queued: unknown destinations and handler failures are reported
/// to the sender.
pub struct MessageBus {
    endpoints: DashMap<String, Arc<dyn MessageHandler>>,
    flights: FlightTracker,
    delivery_timeout: Duration,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl MessageBus {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            endpoints: DashMap::new(),
            flights: FlightTracker::new(),
            delivery_timeout,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Bind `handler` to `id`, replacing any previous binding.
    pub fn bind(&self, id: &str, handler: Arc<dyn MessageHandler>) {
        debug!(unit = id, "endpoint bound");
        self.endpoints.insert(id.to_string(), handler);
    }

    pub fn unbind(&self, id: &str) -> bool {
        let removed = self.endpoints.remove(id).is_some();
        if removed {
            debug!(unit = id, "endpoint unbound");
        }
        removed
    }

    pub fn is_bound(&self, id: &str) -> bool {
        self.endpoints.contains_key(id)
    }

    pub fn endpoints(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn send(&self, envelope: MessageEnvelope) -> Result<Option<Payload>, DeliveryError> {
        if envelope.destination.is_empty() || envelope.kind.is_empty() {
            return Err(DeliveryError::InvalidEnvelope(
                "destination and type must be non-empty".into(),
            ));
        }

        let handler = self
            .endpoints
            .get(&envelope.destination)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DeliveryError::UnknownDestination {
                destination: envelope.destination.clone(),
                kind: envelope.kind.clone(),
            })?;

        let _flight = self.flights.track(&envelope.destination);
        let outcome = tokio::time::timeout(self.delivery_timeout, handler.handle(&envelope)).await;

        let result = match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(HandlerError::Unavailable(reason))) => Err(DeliveryError::Unavailable {
                destination: envelope.destination.clone(),
                reason,
            }),
            Ok(Err(HandlerError::Rejected(reason))) => Err(DeliveryError::HandlerFailed {
                destination: envelope.destination.clone(),
                kind: envelope.kind.clone(),
                reason,
            }),
            Err(_) => Err(DeliveryError::Timeout {
                destination: envelope.destination.clone(),
                kind: envelope.kind.clone(),
                timeout_ms: self.delivery_timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                telemetry::record_message(&envelope.kind, true);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                telemetry::record_message(&envelope.kind, false);
                warn!(
                    source = %envelope.source,
                    destination = %envelope.destination,
                    kind = %envelope.kind,
                    error = %e,
                    "delivery failed"
                );
            }
        }
        result
    }

    /// Wait for deliveries currently executing against `id` to finish.
    pub async fn drain(&self, id: &str, timeout: Duration) -> Result<(), DrainError> {
        self.flights.drain(id, timeout).await
    }

    pub fn in_flight(&self, id: &str) -> u32 {
        self.flights.in_flight_count(id)
    }

    pub(crate) fn forget(&self, id: &str) {
        self.flights.remove(id);
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
