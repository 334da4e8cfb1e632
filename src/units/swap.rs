//! Hot-swap of live units.
//!
//! Orchestrates drain, suspend, preload and commit so a unit keeps its
//! identifier and dependents throughout. Any failure before the commit step
//! resumes the previous instance; the commit itself is a single synchronous
//! pointer swap and cannot be interrupted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::error::HotSwapError;
use super::hook::run_hook;
use super::lifecycle::{HookKind, LifecycleState};
use super::preload::{InstancePreloader, PreloadedInstance};
use super::registry::{UnitLease, UnitRegistry};
use crate::messaging::DrainError;
use crate::telemetry::{self, LifecycleSpan, SpanExt};
use crate::version::{ChangeType, CompatibilityLevel, MigrationPath, Version};

/// What a second swap request does while one is running for the same unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail with `HotSwapError::InProgress`.
    #[default]
    FailFast,
    /// Queue behind the running operation.
    Wait,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail",
            Self::Wait => "wait",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" | "fail_fast" | "fail-fast" => Ok(Self::FailFast),
            "wait" => Ok(Self::Wait),
            other => Err(format!("unknown swap conflict policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    pub conflict: ConflictPolicy,
    /// Bound on waiting for in-flight deliveries before suspending.
    pub drain_timeout: Duration,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            conflict: ConflictPolicy::FailFast,
            drain_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPhase {
    Preparing,
    Draining,
    Staging,
    Committing,
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Draining => "draining",
            Self::Staging => "staging",
            Self::Committing => "committing",
        };
        f.write_str(s)
    }
}

/// Result of a committed swap.
#[derive(Debug, Clone)]
pub struct SwapReport {
    pub unit: String,
    pub from: Version,
    pub to: Version,
    pub change: ChangeType,
    pub level: CompatibilityLevel,
    pub path: MigrationPath,
    pub previous_instance: Uuid,
    pub instance: Uuid,
    pub drain: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwapMode {
    Upgrade,
    Rollback,
    Reload,
}

impl SwapMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "hot_swap",
            Self::Rollback => "rollback",
            Self::Reload => "reload",
        }
    }
}

fn path_label(path: MigrationPath) -> String {
    match path {
        MigrationPath::Skipped => "skipped".to_string(),
        MigrationPath::Strategy => "strategy".to_string(),
        MigrationPath::Generic(level) => format!("generic:{}", level),
    }
}

/// Clears the phase entry for a unit when the swap ends, however it ends.
struct PhaseGuard<'a> {
    phases: &'a DashMap<String, SwapPhase>,
    id: String,
}

impl<'a> PhaseGuard<'a> {
    fn enter(phases: &'a DashMap<String, SwapPhase>, id: &str) -> Self {
        phases.insert(id.to_string(), SwapPhase::Preparing);
        Self {
            phases,
            id: id.to_string(),
        }
    }

    fn set(&self, phase: SwapPhase) {
        debug!(unit = %self.id, %phase, "swap phase");
        self.phases.insert(self.id.clone(), phase);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phases.remove(&self.id);
    }
}

/// Armed while the old instance is suspended and not yet replaced.
/// Dropping it armed puts the old instance back to `Active`.
struct SuspendGuard<'a> {
    registry: &'a UnitRegistry,
    lease: &'a UnitLease,
    armed: bool,
}

impl<'a> SuspendGuard<'a> {
    fn new(registry: &'a UnitRegistry, lease: &'a UnitLease) -> Self {
        Self {
            registry,
            lease,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Resume the old instance, returning `cause` once it is active again.
    async fn restore(mut self, cause: HotSwapError) -> HotSwapError {
        // Stays armed until the resume settles; a drop mid-resume still reactivates.
        let resumed = self.registry.resume_leased(self.lease).await;
        self.armed = false;
        match resumed {
            Ok(()) => {
                info!(unit = %self.lease.id(), error = %cause, "swap failed, previous instance resumed");
                cause
            }
            Err(err) => {
                error!(unit = %self.lease.id(), error = %err, "previous instance could not be resumed");
                HotSwapError::RestoreFailed {
                    unit: self.lease.id().to_string(),
                    cause: cause.to_string(),
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(unit = %self.lease.id(), "swap abandoned before commit, reactivating previous instance");
            self.registry.reactivate_now(self.lease);
        }
    }
}

/// Replaces live unit instances with other versions.
pub struct HotSwapCoordinator {
    registry: Arc<UnitRegistry>,
    preloader: InstancePreloader,
    phases: DashMap<String, SwapPhase>,
    config: SwapConfig,
}

impl HotSwapCoordinator {
    pub fn new(registry: Arc<UnitRegistry>, config: SwapConfig) -> Self {
        let preloader = InstancePreloader::new(Arc::clone(&registry));
        Self {
            registry,
            preloader,
            phases: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn phase(&self, id: &str) -> Option<SwapPhase> {
        self.phases.get(id).map(|p| *p.value())
    }

    /// Units with a swap currently running.
    pub fn in_progress(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.phases.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn hot_swap(&self, id: &str, target: &Version) -> Result<SwapReport, HotSwapError> {
        self.hot_swap_cancellable(id, target, &CancellationToken::new()).await
    }

    /// Like [`hot_swap`](Self::hot_swap). Cancelling `token` before the
    /// commit step leaves the previous instance active.
    pub async fn hot_swap_cancellable(
        &self,
        id: &str,
        target: &Version,
        token: &CancellationToken,
    ) -> Result<SwapReport, HotSwapError> {
        self.run(id, Some(target), SwapMode::Upgrade, token).await
    }

    /// Return a unit to a version recorded in its history.
    pub async fn rollback(&self, id: &str, target: &Version) -> Result<SwapReport, HotSwapError> {
        self.rollback_cancellable(id, target, &CancellationToken::new()).await
    }

    pub async fn rollback_cancellable(
        &self,
        id: &str,
        target: &Version,
        token: &CancellationToken,
    ) -> Result<SwapReport, HotSwapError> {
        self.run(id, Some(target), SwapMode::Rollback, token).await
    }

    /// Replace a unit with a fresh instance of its running version.
    pub async fn reload(&self, id: &str) -> Result<SwapReport, HotSwapError> {
        self.run(id, None, SwapMode::Reload, &CancellationToken::new()).await
    }

    async fn run(
        &self,
        id: &str,
        target: Option<&Version>,
        mode: SwapMode,
        token: &CancellationToken,
    ) -> Result<SwapReport, HotSwapError> {
        let span = LifecycleSpan::new(mode.as_str(), id);
        let started = Instant::now();
        let result = self
            .execute(id, target, mode, token, started)
            .instrument(span.clone())
            .await;
        span.record("duration_ms", started.elapsed().as_millis() as u64);
        span.record_result(&result);

        match &result {
            Ok(report) => span.record_versions(&report.from, &report.to),
            Err(err) => {
                warn!(unit = %id, operation = mode.as_str(), error = %err, "swap not committed");
                telemetry::record_swap(self.registry.metrics(), id, mode.as_str(), false, started.elapsed());
            }
        }
        result
    }

    async fn execute(
        &self,
        id: &str,
        target: Option<&Version>,
        mode: SwapMode,
        token: &CancellationToken,
        started: Instant,
    ) -> Result<SwapReport, HotSwapError> {
        let lease = self.acquire(id, token).await?;
        let phase = PhaseGuard::enter(&self.phases, id);

        let state = lease.state();
        let (Some(current), Some(previous_instance), true) =
            (lease.version(), lease.instance_id(), state == LifecycleState::Active)
        else {
            return Err(HotSwapError::NotActive {
                unit: id.to_string(),
                state,
            });
        };
        let descriptor = lease.descriptor();
        let versions = self.registry.versions();

        let target = match (mode, target) {
            (SwapMode::Reload, _) | (_, None) => current.clone(),
            (SwapMode::Upgrade, Some(target)) => {
                if !descriptor.offers(target) {
                    return Err(HotSwapError::UnknownVersion {
                        unit: id.to_string(),
                        version: target.clone(),
                    });
                }
                versions.check_compatibility(id, &current, target)?;
                target.clone()
            }
            (SwapMode::Rollback, Some(target)) => {
                versions.check_rollback(id, &current, target)?;
                target.clone()
            }
        };

        if token.is_cancelled() {
            return Err(HotSwapError::Cancelled { unit: id.to_string() });
        }

        let mut guard = SuspendGuard::new(&self.registry, &lease);
        let prepared = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PrepareError::Cancelled),
            prepared = self.prepare(&lease, &phase, &current, &target) => prepared,
        };

        let (staged, drain) = match prepared {
            Ok(staged) => staged,
            Err(PrepareError::BeforeSuspend(err)) => {
                guard.disarm();
                return Err(err);
            }
            Err(PrepareError::AfterSuspend(err)) => return Err(guard.restore(err).await),
            Err(PrepareError::Cancelled) => {
                let cancelled = HotSwapError::Cancelled { unit: id.to_string() };
                if lease.state() == LifecycleState::Suspended {
                    return Err(guard.restore(cancelled).await);
                }
                guard.disarm();
                return Err(cancelled);
            }
        };

        if token.is_cancelled() {
            self.preloader.abort(id, staged).await;
            return Err(guard.restore(HotSwapError::Cancelled { unit: id.to_string() }).await);
        }

        phase.set(SwapPhase::Committing);
        let PreloadedInstance {
            live,
            outcome,
            init_elapsed,
        } = staged;
        let instance = live.instance_id;
        let previous = self.registry.commit_swap(&lease, live)?;
        guard.disarm();
        drop(guard);

        let change = match mode {
            SwapMode::Rollback => ChangeType::Rollback,
            _ => ChangeType::for_transition(&current, &target),
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("instance".to_string(), instance.to_string());
        metadata.insert("previous_instance".to_string(), previous_instance.to_string());
        metadata.insert("path".to_string(), path_label(outcome.path));
        metadata.insert("operation".to_string(), mode.as_str().to_string());
        versions.record(id, target.clone(), Some(current.clone()), change, metadata);

        let duration = started.elapsed();
        self.registry.note_swap_duration(&lease, duration);
        drop(lease);
        drop(phase);

        info!(
            unit = %id,
            from = %current,
            to = %target,
            %change,
            init_ms = init_elapsed.as_millis() as u64,
            duration_ms = duration.as_millis() as u64,
            "swap committed"
        );

        let ctx = self.registry.context(id, previous.version.clone(), previous.data);
        if let Err(err) = run_hook(previous.unit, ctx, HookKind::Cleanup, self.registry.config().hook_timeout).await {
            warn!(unit = %id, error = %err, "cleanup of replaced instance failed");
        }

        self.registry.notify_swapped(id, &current, &target).await;
        telemetry::record_swap(self.registry.metrics(), id, mode.as_str(), true, duration);

        Ok(SwapReport {
            unit: id.to_string(),
            from: current,
            to: target,
            change,
            level: outcome.level,
            path: outcome.path,
            previous_instance,
            instance,
            drain,
            duration,
        })
    }

    async fn acquire(&self, id: &str, token: &CancellationToken) -> Result<UnitLease, HotSwapError> {
        match self.config.conflict {
            ConflictPolicy::FailFast => self
                .registry
                .try_lease(id)?
                .ok_or_else(|| HotSwapError::InProgress(id.to_string())),
            ConflictPolicy::Wait => tokio::select! {
                biased;
                _ = token.cancelled() => Err(HotSwapError::Cancelled { unit: id.to_string() }),
                lease = self.registry.lease(id) => Ok(lease?),
            },
        }
    }

    /// Drain, suspend and stage the replacement.
    async fn prepare(
        &self,
        lease: &UnitLease,
        phase: &PhaseGuard<'_>,
        current: &Version,
        target: &Version,
    ) -> Result<(PreloadedInstance, Duration), PrepareError> {
        let id = lease.id();

        phase.set(SwapPhase::Draining);
        let drain_started = Instant::now();
        if let Err(DrainError::Timeout { remaining, .. }) =
            self.registry.bus().drain(id, self.config.drain_timeout).await
        {
            return Err(PrepareError::BeforeSuspend(HotSwapError::DrainTimeout {
                unit: id.to_string(),
                remaining,
            }));
        }
        let drain = drain_started.elapsed();

        let data = lease.data().unwrap_or_default();
        self.registry
            .begin_suspend(lease)
            .map_err(|e| PrepareError::BeforeSuspend(HotSwapError::from(e)))?;
        // Hook failure keeps the old instance; restore resumes it.
        self.registry
            .run_suspend_hook(lease)
            .await
            .map_err(|e| PrepareError::AfterSuspend(HotSwapError::from(e)))?;

        phase.set(SwapPhase::Staging);
        let staged = self
            .preloader
            .preload(&lease.descriptor(), current, target, data)
            .await
            .map_err(PrepareError::AfterSuspend)?;
        Ok((staged, drain))
    }
}

/// Failure while preparing, split by whether the live instance is suspended.
enum PrepareError {
    BeforeSuspend(HotSwapError),
    AfterSuspend(HotSwapError),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!("fail".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::FailFast);
        assert_eq!("FAIL_FAST".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::FailFast);
        assert_eq!("wait".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Wait);
        assert!("sometimes".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::default().as_str(), "fail");
    }

    #[test]
    fn test_phase_guard_clears_entry() {
        let phases = DashMap::new();
        {
            let guard = PhaseGuard::enter(&phases, "a");
            guard.set(SwapPhase::Staging);
            assert_eq!(phases.get("a").map(|p| *p), Some(SwapPhase::Staging));
        }
        assert!(phases.is_empty());
    }

    #[test]
    fn test_path_labels() {
        assert_eq!(path_label(MigrationPath::Strategy), "strategy");
        assert_eq!(
            path_label(MigrationPath::Generic(CompatibilityLevel::Breaking)),
            "generic:breaking"
        );
    }
}
