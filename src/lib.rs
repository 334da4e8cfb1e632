//! unit-core runtime
//!
//! Lifecycle and versioning engine for independently versioned units.
//! Units are discovered from manifests, loaded in dependency order, and
//! replaced at runtime by other versions without losing their identifier,
//! their dependents, or their data.
//!
//! # Flow
//!
//! - **Discover**: manifests become [`units::UnitDescriptor`]s
//! - **Plan**: the resolver orders units so dependencies load first
//! - **Load**: the registry instantiates units through their factories
//! - **Swap**: the coordinator drains, suspends, migrates and commits
//!
//! Everything is held by a [`Runtime`], constructed explicitly; there is no
//! process-wide state besides the metrics facade and the log subscriber.

pub mod cli;
pub mod config;
pub mod health;
pub mod messaging;
pub mod shutdown;
pub mod snapshot;
pub mod telemetry;
pub mod units;
pub mod version;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use health::{HealthChecker, HealthReport};
use messaging::{DeliveryError, MessageBus, MessageEnvelope, Payload};
use shutdown::{ShutdownCoordinator, ShutdownResult};
use units::{
    DependencyResolver, DiscoveryError, DiscoveryReport, HotSwapCoordinator, HotSwapError, LifecycleError,
    LifecycleState, LoadPlan, LoadReport, ManifestSource, RegistryConfig, SwapConfig, SwapReport, SyncReport,
    UnitDescriptor, UnitDiscovery, UnitFactory, UnitInstance, UnitRegistry,
};
use version::{MigrationPolicy, Version, VersionHistoryEntry, VersionManager};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub manifest_dir: PathBuf,
    pub registry: RegistryConfig,
    pub swap: SwapConfig,
    pub migration: MigrationPolicy,
    pub delivery_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            manifest_dir: PathBuf::from("units"),
            registry: RegistryConfig::default(),
            swap: SwapConfig::default(),
            migration: MigrationPolicy::default(),
            delivery_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of [`Runtime::shutdown`].
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub drained: bool,
    /// Operations still running when the drain timed out.
    pub abandoned: u32,
    pub unloaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// The unit-core runtime instance.
pub struct Runtime {
    config: RuntimeConfig,
    discovery: UnitDiscovery,
    versions: Arc<VersionManager>,
    bus: Arc<MessageBus>,
    registry: Arc<UnitRegistry>,
    coordinator: HotSwapCoordinator,
    shutdown: ShutdownCoordinator,
    health: HealthChecker,
}

impl Runtime {
    /// Create a runtime reading manifests from `config.manifest_dir`.
    pub fn new(config: RuntimeConfig) -> Self {
        let discovery = UnitDiscovery::from_dir(config.manifest_dir.clone());
        Self::build(config, discovery)
    }

    /// Create a runtime reading manifests from `source`.
    pub fn with_source(config: RuntimeConfig, source: Arc<dyn ManifestSource>) -> Self {
        Self::build(config, UnitDiscovery::new(source))
    }

    fn build(config: RuntimeConfig, discovery: UnitDiscovery) -> Self {
        telemetry::init_metrics();
        let versions = Arc::new(VersionManager::with_policy(config.migration.clone()));
        let bus = Arc::new(MessageBus::new(config.delivery_timeout));
        let registry = Arc::new(UnitRegistry::new(
            config.registry.clone(),
            Arc::clone(&versions),
            Arc::clone(&bus),
        ));
        let coordinator = HotSwapCoordinator::new(Arc::clone(&registry), config.swap.clone());

        info!(
            registry = %registry.id(),
            source = %discovery.source_name(),
            "runtime created"
        );

        Self {
            config,
            discovery,
            versions,
            bus,
            registry,
            coordinator,
            shutdown: ShutdownCoordinator::new(),
            health: HealthChecker::default(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.registry
    }

    pub fn versions(&self) -> &Arc<VersionManager> {
        &self.versions
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn coordinator(&self) -> &HotSwapCoordinator {
        &self.coordinator
    }

    pub fn register_factory(&self, id: impl Into<String>, factory: Arc<dyn UnitFactory>) {
        self.registry.register_factory(id, factory);
    }

    pub fn set_default_factory(&self, factory: Arc<dyn UnitFactory>) {
        self.registry.set_default_factory(factory);
    }

    // ---- discovery ----

    /// Scan the manifest source strictly and reconcile the registry with
    /// the result. Nothing is registered if any manifest is invalid.
    pub fn discover(&self) -> Result<Vec<UnitDescriptor>, DiscoveryError> {
        let descriptors = self.discovery.discover()?;
        self.reconcile(descriptors.clone());
        Ok(descriptors)
    }

    /// Scan leniently: valid manifests are registered, invalid ones reported.
    pub fn scan(&self) -> Result<DiscoveryReport, DiscoveryError> {
        let report = self.discovery.scan()?;
        for err in &report.errors {
            warn!(unit = err.unit().unwrap_or("?"), error = %err, "manifest rejected");
        }
        self.reconcile(report.descriptors.clone());
        Ok(report)
    }

    fn reconcile(&self, descriptors: Vec<UnitDescriptor>) -> SyncReport {
        let report = self.registry.sync(descriptors);
        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            missing = report.missing.len(),
            "registry reconciled"
        );
        report
    }

    /// Load order over every registered unit.
    pub fn plan(&self) -> LoadPlan {
        DependencyResolver::plan(&self.registry.descriptors())
    }

    // ---- lifecycle ----

    pub async fn load(&self, id: &str) -> Result<(), LifecycleError> {
        let _guard = self.shutdown.admit("load")?;
        self.registry.load(id).await
    }

    /// Load every registered unit that is not yet active, in plan order.
    /// Units the plan rejects are reported as skipped.
    pub async fn load_all(&self) -> Result<LoadReport, LifecycleError> {
        let _guard = self.shutdown.admit("load_all")?;
        let plan = self.plan();
        let mut report = self.registry.load_all(&plan.order).await;
        report
            .skipped
            .extend(plan.rejected.iter().map(|(id, err)| (id.clone(), err.to_string())));
        Ok(report)
    }

    pub async fn unload(&self, id: &str) -> Result<(), LifecycleError> {
        let _guard = self.shutdown.admit("unload")?;
        self.registry.unload(id).await
    }

    pub async fn suspend(&self, id: &str) -> Result<(), LifecycleError> {
        let _guard = self.shutdown.admit("suspend")?;
        self.registry.suspend(id).await
    }

    pub async fn resume(&self, id: &str) -> Result<(), LifecycleError> {
        let _guard = self.shutdown.admit("resume")?;
        self.registry.resume(id).await
    }

    // ---- hot-swap ----

    pub async fn hot_swap(&self, id: &str, target: &Version) -> Result<SwapReport, HotSwapError> {
        let _guard = self.shutdown.admit("hot_swap")?;
        self.coordinator.hot_swap(id, target).await
    }

    pub async fn hot_swap_cancellable(
        &self,
        id: &str,
        target: &Version,
        token: &CancellationToken,
    ) -> Result<SwapReport, HotSwapError> {
        let _guard = self.shutdown.admit("hot_swap")?;
        self.coordinator.hot_swap_cancellable(id, target, token).await
    }

    pub async fn rollback(&self, id: &str, target: &Version) -> Result<SwapReport, HotSwapError> {
        let _guard = self.shutdown.admit("rollback")?;
        self.coordinator.rollback(id, target).await
    }

    pub async fn reload(&self, id: &str) -> Result<SwapReport, HotSwapError> {
        let _guard = self.shutdown.admit("reload")?;
        self.coordinator.reload(id).await
    }

    // ---- queries ----

    pub fn is_loaded(&self, id: &str) -> bool {
        self.registry.is_loaded(id)
    }

    pub fn all_active(&self) -> Vec<String> {
        self.registry.all_active()
    }

    pub fn get(&self, id: &str) -> Option<UnitInstance> {
        self.registry.get(id)
    }

    pub fn history(&self, id: &str) -> Vec<VersionHistoryEntry> {
        self.versions.history(id)
    }

    pub async fn send(&self, envelope: MessageEnvelope) -> Result<Option<Payload>, DeliveryError> {
        self.bus.send(envelope).await
    }

    pub fn health(&self) -> HealthReport {
        self.health.report(&self.registry, self.shutdown.state())
    }

    // ---- shutdown ----

    /// Refuse new operations, wait up to `timeout` for running ones, then
    /// unload live units dependents-first.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        if !self.shutdown.begin() {
            warn!("shutdown already in progress");
        }
        let (drained, abandoned) = match self.shutdown.wait_for_drain(timeout).await {
            ShutdownResult::Complete => (true, 0),
            ShutdownResult::Timeout { remaining } => {
                warn!(remaining, "shutdown drain timed out");
                (false, remaining)
            }
        };

        let mut order = DependencyResolver::plan(&self.registry.descriptors()).order;
        order.reverse();

        let mut unloaded = Vec::new();
        let mut failed = Vec::new();
        for id in order {
            if self.registry.state(&id) == Some(LifecycleState::Suspended) {
                if let Err(err) = self.registry.resume(&id).await {
                    failed.push((id, err.to_string()));
                    continue;
                }
            }
            if self.registry.state(&id) != Some(LifecycleState::Active) {
                continue;
            }
            match self.registry.unload(&id).await {
                Ok(()) => unloaded.push(id),
                Err(err) => {
                    warn!(unit = %id, error = %err, "unit not unloaded at shutdown");
                    failed.push((id, err.to_string()));
                }
            }
        }

        self.shutdown.finish();
        info!(unloaded = unloaded.len(), failed = failed.len(), "shutdown complete");
        ShutdownReport {
            drained,
            abandoned,
            unloaded,
            failed,
        }
    }

    /// Shut down with the configured timeout.
    pub async fn shutdown_default(&self) -> ShutdownReport {
        self.shutdown(self.config.shutdown_timeout).await
    }
}
