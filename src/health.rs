//! Health reporting over registry state.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::shutdown::ShutdownState;
use crate::units::{LifecycleState, UnitRegistry};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_operations: bool,
    pub shutdown: ShutdownState,
    pub units_total: usize,
    pub units: BTreeMap<LifecycleState, usize>,
    pub failed_units: Vec<String>,
    pub uptime_secs: u64,
}

impl HealthReport {
    pub fn count(&self, state: LifecycleState) -> usize {
        self.units.get(&state).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthConfig {
    /// Report `Degraded` while no unit is active.
    pub require_active_unit: bool,
}

/// Aggregates health information from the registry.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Check liveness: process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Check readiness: accepting lifecycle operations with no failed unit.
    pub fn is_ready(&self, registry: &UnitRegistry, shutdown_state: ShutdownState) -> bool {
        self.compute_state(&registry.state_counts(), shutdown_state) == HealthState::Healthy
    }

    pub fn report(&self, registry: &UnitRegistry, shutdown_state: ShutdownState) -> HealthReport {
        let units = registry.state_counts();
        let state = self.compute_state(&units, shutdown_state);
        let failed_units = registry
            .statuses()
            .into_iter()
            .filter(|s| s.state == LifecycleState::Failed)
            .map(|s| s.id)
            .collect();

        HealthReport {
            state,
            ready: state == HealthState::Healthy,
            accepting_operations: shutdown_state == ShutdownState::Running,
            shutdown: shutdown_state,
            units_total: registry.len(),
            units,
            failed_units,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, units: &BTreeMap<LifecycleState, usize>, shutdown_state: ShutdownState) -> HealthState {
        if shutdown_state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if units.get(&LifecycleState::Failed).copied().unwrap_or(0) > 0 {
            return HealthState::Degraded;
        }
        if self.config.require_active_unit && units.get(&LifecycleState::Active).copied().unwrap_or(0) == 0 {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
