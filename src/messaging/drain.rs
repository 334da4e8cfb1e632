//! In-flight delivery tracking for drain coordination.
//!
//! Counts deliveries currently executing per destination so a hot-swap can
//! wait for them before suspending the unit.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("Drain of {unit} timed out with {remaining} delivery(ies) in flight")]
    Timeout { unit: String, remaining: u32 },
}

/// In-flight count for one destination, with a wakeup when it reaches zero.
#[derive(Default)]
struct Flight {
    count: AtomicU32,
    idle: Notify,
}

/// Tracks in-flight deliveries per destination identifier.
pub struct FlightTracker {
    in_flight: DashMap<String, Arc<Flight>>,
}

impl FlightTracker {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Increment the in-flight count for `unit` (returns RAII guard).
    pub fn track(&self, unit: &str) -> FlightGuard {
        let flight = Arc::clone(self.in_flight.entry(unit.to_string()).or_default().value());
        flight.count.fetch_add(1, Ordering::SeqCst);
        FlightGuard { flight }
    }

    pub fn in_flight_count(&self, unit: &str) -> u32 {
        self.in_flight
            .get(unit)
            .map(|f| f.count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Wait until the in-flight count for `unit` reaches zero.
    pub async fn drain(&self, unit: &str, timeout: Duration) -> Result<(), DrainError> {
        let Some(flight) = self.in_flight.get(unit).map(|f| Arc::clone(f.value())) else {
            return Ok(());
        };
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register before reading the count so a release in between is not missed.
            let idle = flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            let count = flight.count.load(Ordering::SeqCst);
            if count == 0 {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                let remaining = flight.count.load(Ordering::SeqCst);
                if remaining == 0 {
                    return Ok(());
                }
                return Err(DrainError::Timeout {
                    unit: unit.to_string(),
                    remaining,
                });
            }
        }
    }

    /// Drop the tracking entry for `unit` (after unload).
    pub fn remove(&self, unit: &str) {
        self.in_flight.remove(unit);
    }
}

impl Default for FlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop and wakes drainers at zero.
pub struct FlightGuard {
    flight: Arc<Flight>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.flight.idle.notify_waiters();
        }
    }
}
