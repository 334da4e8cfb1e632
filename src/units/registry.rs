//! Registry of units and their live instances.
//!
//! One slot per identifier. Each slot pairs an operation lock, held for the
//! whole of a load, unload, suspend, resume or hot-swap, with a short-lived
//! record lock guarding the state and the instance pointer. Operations on
//! different identifiers never contend; queries never wait on a running
//! operation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::descriptor::UnitDescriptor;
use super::error::{BusyReason, LifecycleError};
use super::hook::run_hook;
use super::lifecycle::{HookKind, LifecycleEvent, LifecycleState};
use super::unit::{Unit, UnitContext, UnitFactory};
use crate::messaging::{kinds, HandlerError, MessageBus, MessageEnvelope, MessageHandler, Payload};
use crate::snapshot::InstanceData;
use crate::telemetry::{self, LifecycleSpan, MetricsStore, SpanExt};
use crate::version::{ChangeType, Version, VersionManager};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a registry within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RegistryId(u64);

impl RegistryId {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Applied to every unit hook.
    pub hook_timeout: Duration,
    /// Concurrent load tasks during `load_all`.
    pub max_concurrent_loads: usize,
    /// Lifecycle event broadcast capacity.
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(5),
            max_concurrent_loads: num_cpus::get().max(1),
            event_capacity: 256,
        }
    }
}

/// Per-unit counters, carried across instances of the same unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitMetrics {
    pub loads: u64,
    pub unloads: u64,
    pub swaps: u64,
    pub failures: u64,
    pub messages_handled: u64,
    pub last_init_ms: Option<u64>,
    pub last_swap_ms: Option<u64>,
}

/// Read-only view of a unit's live instance.
#[derive(Debug, Clone, Serialize)]
pub struct UnitInstance {
    pub id: String,
    pub instance_id: Uuid,
    pub registry: RegistryId,
    pub version: Version,
    pub state: LifecycleState,
    pub data: InstanceData,
    pub metrics: UnitMetrics,
    pub active_since: DateTime<Utc>,
}

/// Registry-level view of a unit, live or not.
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub id: String,
    pub display_name: String,
    pub state: LifecycleState,
    pub declared_version: Version,
    pub running_version: Option<Version>,
    pub dependencies: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    /// Registered units absent from the new descriptor list (left as they are).
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub already_active: Vec<String>,
    pub failed: Vec<(String, LifecycleError)>,
    /// Units not attempted, with the failed dependency that blocked them.
    pub skipped: Vec<(String, String)>,
}

impl LoadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

pub(crate) struct LiveInstance {
    pub(crate) instance_id: Uuid,
    pub(crate) version: Version,
    pub(crate) unit: Arc<dyn Unit>,
    pub(crate) data: InstanceData,
    pub(crate) since: DateTime<Utc>,
}

impl LiveInstance {
    pub(crate) fn new(version: Version, unit: Arc<dyn Unit>, data: InstanceData) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            version,
            unit,
            data,
            since: Utc::now(),
        }
    }
}

struct Record {
    descriptor: UnitDescriptor,
    state: LifecycleState,
    live: Option<LiveInstance>,
    metrics: UnitMetrics,
    last_error: Option<String>,
}

pub(crate) struct UnitSlot {
    id: String,
    op: Arc<Mutex<()>>,
    record: RwLock<Record>,
}

impl UnitSlot {
    fn new(descriptor: UnitDescriptor) -> Self {
        Self {
            id: descriptor.id().to_string(),
            op: Arc::new(Mutex::new(())),
            record: RwLock::new(Record {
                descriptor,
                state: LifecycleState::Discovered,
                live: None,
                metrics: UnitMetrics::default(),
                last_error: None,
            }),
        }
    }

    fn state(&self) -> LifecycleState {
        self.record.read().state
    }
}

/// Exclusive right to run one lifecycle operation on one unit.
pub(crate) struct UnitLease {
    slot: Arc<UnitSlot>,
    _guard: OwnedMutexGuard<()>,
}

impl UnitLease {
    pub(crate) fn id(&self) -> &str {
        &self.slot.id
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.slot.state()
    }

    pub(crate) fn descriptor(&self) -> UnitDescriptor {
        self.slot.record.read().descriptor.clone()
    }

    pub(crate) fn version(&self) -> Option<Version> {
        self.slot.record.read().live.as_ref().map(|l| l.version.clone())
    }

    pub(crate) fn instance_id(&self) -> Option<Uuid> {
        self.slot.record.read().live.as_ref().map(|l| l.instance_id)
    }

    pub(crate) fn data(&self) -> Option<InstanceData> {
        self.slot.record.read().live.as_ref().map(|l| l.data.clone())
    }
}

/// Delivers envelopes to whichever instance is live at delivery time.
struct UnitEndpoint {
    slot: Weak<UnitSlot>,
    bus: Weak<MessageBus>,
}

#[async_trait]
impl MessageHandler for UnitEndpoint {
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<Option<Payload>, HandlerError> {
        let slot = self
            .slot
            .upgrade()
            .ok_or_else(|| HandlerError::Unavailable("unit removed".into()))?;
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| HandlerError::Unavailable("bus closed".into()))?;

        let (unit, ctx) = {
            let record = slot.record.read();
            if record.state != LifecycleState::Active {
                return Err(HandlerError::Unavailable(format!("unit is {}", record.state)));
            }
            let live = record
                .live
                .as_ref()
                .ok_or_else(|| HandlerError::Unavailable("no live instance".into()))?;
            (
                Arc::clone(&live.unit),
                UnitContext::new(slot.id.as_str(), live.version.clone(), live.data.clone(), bus),
            )
        };

        let reply = unit.handle_message(envelope, &ctx).await;
        if reply.is_ok() {
            slot.record.write().metrics.messages_handled += 1;
        }
        reply
    }
}

/// Thread-safe registry of units.
pub struct UnitRegistry {
    id: RegistryId,
    slots: DashMap<String, Arc<UnitSlot>>,
    factories: RwLock<HashMap<String, Arc<dyn UnitFactory>>>,
    default_factory: RwLock<Option<Arc<dyn UnitFactory>>>,
    versions: Arc<VersionManager>,
    bus: Arc<MessageBus>,
    events: broadcast::Sender<LifecycleEvent>,
    load_permits: Semaphore,
    metrics: Arc<MetricsStore>,
    config: RegistryConfig,
}

impl UnitRegistry {
    pub fn new(config: RegistryConfig, versions: Arc<VersionManager>, bus: Arc<MessageBus>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            id: RegistryId(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed)),
            slots: DashMap::new(),
            factories: RwLock::new(HashMap::new()),
            default_factory: RwLock::new(None),
            versions,
            bus,
            events,
            load_permits: Semaphore::new(config.max_concurrent_loads.max(1)),
            metrics: Arc::new(MetricsStore::new()),
            config,
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn versions(&self) -> &Arc<VersionManager> {
        &self.versions
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Factory for one identifier; takes precedence over the default factory.
    pub fn register_factory(&self, id: impl Into<String>, factory: Arc<dyn UnitFactory>) {
        self.factories.write().insert(id.into(), factory);
    }

    pub fn set_default_factory(&self, factory: Arc<dyn UnitFactory>) {
        *self.default_factory.write() = Some(factory);
    }

    // ---- registration ----

    /// Add a unit in `Discovered`, or replace the descriptor of a known one.
    /// Returns true when the identifier was new.
    pub fn register(&self, descriptor: UnitDescriptor) -> bool {
        let id = descriptor.id().to_string();
        if let Some(slot) = self.slots.get(&id).map(|s| Arc::clone(s.value())) {
            slot.record.write().descriptor = descriptor;
            return false;
        }
        debug!(unit = %id, "unit registered");
        self.slots.insert(id, Arc::new(UnitSlot::new(descriptor)));
        true
    }

    /// Reconcile against a fresh discovery result. Live instances keep
    /// running; only descriptors are replaced.
    pub fn sync(&self, descriptors: Vec<UnitDescriptor>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let id = descriptor.id().to_string();
            seen.push(id.clone());
            let previous = self.descriptor(&id).map(|d| d.digest().to_string());
            let changed = previous.as_deref() != Some(descriptor.digest());
            self.register(descriptor);
            match (previous, changed) {
                (None, _) => report.added.push(id),
                (Some(_), true) => report.updated.push(id),
                (Some(_), false) => report.unchanged.push(id),
            }
        }
        report.missing = self.ids().into_iter().filter(|id| !seen.contains(id)).collect();
        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            missing = report.missing.len(),
            "registry synchronized"
        );
        report
    }

    // ---- queries ----

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registered identifiers, ascending.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn descriptor(&self, id: &str) -> Option<UnitDescriptor> {
        self.slot(id).map(|s| s.record.read().descriptor.clone())
    }

    /// All descriptors, ascending by identifier.
    pub fn descriptors(&self) -> Vec<UnitDescriptor> {
        self.ids().iter().filter_map(|id| self.descriptor(id)).collect()
    }

    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        self.slot(id).map(|s| s.state())
    }

    /// A live instance exists and is not being torn down (`Active` or `Suspended`).
    pub fn is_loaded(&self, id: &str) -> bool {
        matches!(
            self.state(id),
            Some(LifecycleState::Active | LifecycleState::Suspended)
        )
    }

    /// Identifiers of `Active` units, ascending.
    pub fn all_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.value().state() == LifecycleState::Active)
            .map(|s| s.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// View of the live instance, if there is one.
    pub fn get(&self, id: &str) -> Option<UnitInstance> {
        let slot = self.slot(id)?;
        let record = slot.record.read();
        let live = record.live.as_ref()?;
        Some(UnitInstance {
            id: slot.id.clone(),
            instance_id: live.instance_id,
            registry: self.id,
            version: live.version.clone(),
            state: record.state,
            data: live.data.clone(),
            metrics: record.metrics.clone(),
            active_since: live.since,
        })
    }

    pub fn status(&self, id: &str) -> Option<UnitStatus> {
        let slot = self.slot(id)?;
        let record = slot.record.read();
        Some(UnitStatus {
            id: slot.id.clone(),
            display_name: record.descriptor.display_name().to_string(),
            state: record.state,
            declared_version: record.descriptor.version().clone(),
            running_version: record.live.as_ref().map(|l| l.version.clone()),
            dependencies: record.descriptor.dependencies().iter().cloned().collect(),
            last_error: record.last_error.clone(),
        })
    }

    /// Status of every unit, ascending by identifier.
    pub fn statuses(&self) -> Vec<UnitStatus> {
        self.ids().iter().filter_map(|id| self.status(id)).collect()
    }

    /// Count of units per lifecycle state.
    pub fn state_counts(&self) -> BTreeMap<LifecycleState, usize> {
        let mut counts = BTreeMap::new();
        for slot in self.slots.iter() {
            *counts.entry(slot.value().state()).or_insert(0) += 1;
        }
        counts
    }

    /// Units whose descriptor depends on `id` and that have a live instance.
    pub fn live_dependents(&self, id: &str) -> Vec<String> {
        self.dependents_where(id, |state| {
            matches!(
                state,
                LifecycleState::Loading | LifecycleState::Active | LifecycleState::Suspended
            )
        })
    }

    /// Units whose descriptor depends on `id` and that are `Active`.
    pub fn active_dependents(&self, id: &str) -> Vec<String> {
        self.dependents_where(id, |state| state == LifecycleState::Active)
    }

    fn dependents_where(&self, id: &str, keep: impl Fn(LifecycleState) -> bool) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .iter()
            .filter(|s| {
                let record = s.value().record.read();
                record.descriptor.depends_on(id) && keep(record.state)
            })
            .map(|s| s.key().clone())
            .collect();
        ids.sort();
        ids
    }

    // ---- leases ----

    fn slot(&self, id: &str) -> Option<Arc<UnitSlot>> {
        self.slots.get(id).map(|s| Arc::clone(s.value()))
    }

    fn slot_or_err(&self, id: &str) -> Result<Arc<UnitSlot>, LifecycleError> {
        self.slot(id).ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// Wait for exclusive access to `id`.
    pub(crate) async fn lease(&self, id: &str) -> Result<UnitLease, LifecycleError> {
        let slot = self.slot_or_err(id)?;
        let guard = Arc::clone(&slot.op).lock_owned().await;
        Ok(UnitLease { slot, _guard: guard })
    }

    /// Exclusive access to `id` if nothing else holds it. `Ok(None)` when busy.
    pub(crate) fn try_lease(&self, id: &str) -> Result<Option<UnitLease>, LifecycleError> {
        let slot = self.slot_or_err(id)?;
        let guard = Arc::clone(&slot.op).try_lock_owned().ok();
        Ok(guard.map(|guard| UnitLease { slot, _guard: guard }))
    }
}

/// Armed while a unit sits in `Loading` or `Unloading`. Dropping it armed
/// (the operation's future was dropped mid-hook) puts the unit back in the
/// state the operation started from.
struct PendingTransition<'a> {
    registry: &'a UnitRegistry,
    slot: &'a Arc<UnitSlot>,
    during: LifecycleState,
    revert_to: LifecycleState,
    armed: bool,
}

impl<'a> PendingTransition<'a> {
    fn new(registry: &'a UnitRegistry, slot: &'a Arc<UnitSlot>, during: LifecycleState, revert_to: LifecycleState) -> Self {
        Self {
            registry,
            slot,
            during,
            revert_to,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingTransition<'_> {
    fn drop(&mut self) {
        if !self.armed || self.slot.state() != self.during {
            return;
        }
        warn!(unit = %self.slot.id, from = %self.during, to = %self.revert_to, "operation abandoned, reverting state");
        match self.registry.transition(self.slot, self.revert_to) {
            Ok(_) if self.revert_to == LifecycleState::Active => self.registry.bind_endpoint(self.slot),
            Ok(_) => {}
            Err(err) => warn!(unit = %self.slot.id, error = %err, "could not revert abandoned operation"),
        }
    }
}

impl UnitRegistry {
    // ---- transitions ----

    fn publish(&self, unit: &str, from: LifecycleState, to: LifecycleState, version: Option<Version>) {
        info!(unit = %unit, %from, %to, "lifecycle transition");
        // No receivers is fine.
        let _ = self.events.send(LifecycleEvent {
            unit: unit.to_string(),
            from,
            to,
            version,
            at: Utc::now(),
        });
    }

    /// Move `slot` to `to`, applying `update` under the same write lock.
    fn transition_with(
        &self,
        slot: &UnitSlot,
        to: LifecycleState,
        update: impl FnOnce(&mut Record),
    ) -> Result<LifecycleState, LifecycleError> {
        let (from, version) = {
            let mut record = slot.record.write();
            let from = record.state;
            if !from.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition {
                    unit: slot.id.clone(),
                    from,
                    to,
                });
            }
            record.state = to;
            update(&mut record);
            (from, record.live.as_ref().map(|l| l.version.clone()))
        };
        self.publish(&slot.id, from, to, version);
        Ok(from)
    }

    fn transition(&self, slot: &UnitSlot, to: LifecycleState) -> Result<LifecycleState, LifecycleError> {
        self.transition_with(slot, to, |_| {})
    }

    /// Record a failure: state `Failed`, instance dropped, error kept for status.
    fn fail(&self, slot: &UnitSlot, err: &LifecycleError) {
        let reason = err.to_string();
        let result = self.transition_with(slot, LifecycleState::Failed, |record| {
            record.live = None;
            record.metrics.failures += 1;
            record.last_error = Some(reason);
        });
        if let Err(e) = result {
            warn!(unit = %slot.id, error = %e, "could not mark unit failed");
        }
        self.bus.unbind(&slot.id);
    }

    fn check_dependencies(&self, descriptor: &UnitDescriptor) -> Result<(), LifecycleError> {
        for dependency in descriptor.dependencies() {
            let state = self.state(dependency);
            if state != Some(LifecycleState::Active) {
                return Err(LifecycleError::DependencyNotActive {
                    unit: descriptor.id().to_string(),
                    dependency: dependency.clone(),
                    state,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn instantiate(
        &self,
        descriptor: &UnitDescriptor,
        version: &Version,
    ) -> Result<Arc<dyn Unit>, LifecycleError> {
        let factory = self
            .factories
            .read()
            .get(descriptor.id())
            .cloned()
            .or_else(|| self.default_factory.read().clone())
            .ok_or_else(|| LifecycleError::NoFactory {
                unit: descriptor.id().to_string(),
                version: version.clone(),
            })?;
        factory.create(descriptor, version).map_err(|reason| LifecycleError::Factory {
            unit: descriptor.id().to_string(),
            version: version.clone(),
            reason,
        })
    }

    pub(crate) fn context(&self, id: &str, version: Version, data: InstanceData) -> UnitContext {
        UnitContext::new(id, version, data, Arc::clone(&self.bus))
    }

    fn bind_endpoint(&self, slot: &Arc<UnitSlot>) {
        self.bus.bind(
            &slot.id,
            Arc::new(UnitEndpoint {
                slot: Arc::downgrade(slot),
                bus: Arc::downgrade(&self.bus),
            }),
        );
    }

    // ---- load ----

    /// Create and initialize an instance of the unit's declared version.
    ///
    /// Every dependency must be `Active`. A failing or timed-out init hook
    /// leaves the unit `Failed`; nothing retries it.
    pub async fn load(&self, id: &str) -> Result<(), LifecycleError> {
        let span = LifecycleSpan::new("load", id);
        let result = async {
            let lease = self.lease(id).await?;
            self.load_leased(&lease).await
        }
        .instrument(span.clone())
        .await;
        span.record_result(&result);

        if result.is_ok() {
            self.notify(id, kinds::ACTIVATED, Payload::new()).await;
        }
        result
    }

    async fn load_leased(&self, lease: &UnitLease) -> Result<(), LifecycleError> {
        let slot = &lease.slot;
        let descriptor = lease.descriptor();
        let state = slot.state();
        if !state.is_loadable() {
            return Err(LifecycleError::InvalidTransition {
                unit: slot.id.clone(),
                from: state,
                to: LifecycleState::Loading,
            });
        }
        self.check_dependencies(&descriptor)?;
        let from = self.transition(slot, LifecycleState::Loading)?;
        let mut pending = PendingTransition::new(self, slot, LifecycleState::Loading, from);

        // A dependency may have started unloading between the check and the transition.
        if let Err(err) = self.check_dependencies(&descriptor) {
            pending.disarm();
            self.fail(slot, &err);
            telemetry::record_load(&self.metrics, &slot.id, false);
            return Err(err);
        }

        let started = self.start_instance(&descriptor).await;
        pending.disarm();
        match started {
            Ok((live, elapsed)) => {
                let version = live.version.clone();
                self.transition_with(slot, LifecycleState::Active, |record| {
                    record.live = Some(live);
                    record.metrics.loads += 1;
                    record.metrics.last_init_ms = Some(elapsed.as_millis() as u64);
                    record.last_error = None;
                })?;
                self.bind_endpoint(slot);
                if !self.versions.has_history(&slot.id) {
                    let mut metadata = BTreeMap::new();
                    metadata.insert("registry".to_string(), self.id.to_string());
                    self.versions
                        .record(&slot.id, version, None, ChangeType::Creation, metadata);
                }
                telemetry::record_load(&self.metrics, &slot.id, true);
                Ok(())
            }
            Err(err) => {
                self.fail(slot, &err);
                telemetry::record_load(&self.metrics, &slot.id, false);
                Err(err)
            }
        }
    }

    async fn start_instance(&self, descriptor: &UnitDescriptor) -> Result<(LiveInstance, Duration), LifecycleError> {
        let version = descriptor.version().clone();
        let unit = self.instantiate(descriptor, &version)?;
        let data = InstanceData::with_configuration(descriptor.default_config().clone());
        let ctx = self.context(descriptor.id(), version.clone(), data);
        let outcome = run_hook(Arc::clone(&unit), ctx, HookKind::Init, self.config.hook_timeout).await?;
        Ok((LiveInstance::new(version, unit, outcome.data), outcome.elapsed))
    }

    /// Load `order` (dependencies first), running independent units
    /// concurrently. A unit starts only once all its dependencies in `order`
    /// are active; dependents of a failed unit are skipped.
    pub async fn load_all(&self, order: &[String]) -> LoadReport {
        let mut report = LoadReport::default();
        let planned: Vec<&String> = order.iter().collect();

        let mut waiting: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut ready: Vec<&str> = Vec::new();
        for id in &planned {
            let Some(descriptor) = self.descriptor(id) else {
                report
                    .failed
                    .push((id.to_string(), LifecycleError::NotFound(id.to_string())));
                continue;
            };
            if self.state(id) == Some(LifecycleState::Active) {
                report.already_active.push(id.to_string());
                continue;
            }
            let pending: Vec<&str> = planned
                .iter()
                .filter(|other| {
                    descriptor.depends_on(other) && self.state(other) != Some(LifecycleState::Active)
                })
                .map(|other| other.as_str())
                .collect();
            for dependency in &pending {
                dependents.entry(*dependency).or_default().push(id.as_str());
            }
            if pending.is_empty() {
                ready.push(id.as_str());
            } else {
                waiting.insert(id.as_str(), pending.len());
            }
        }

        let mut in_flight = FuturesUnordered::new();
        for id in ready {
            in_flight.push(self.load_task(id));
        }

        while let Some((id, result)) = in_flight.next().await {
            match result {
                Ok(()) => {
                    report.loaded.push(id.to_string());
                    for dependent in dependents.get(id).cloned().unwrap_or_default() {
                        if let Some(remaining) = waiting.get_mut(dependent) {
                            *remaining -= 1;
                            if *remaining == 0 {
                                waiting.remove(dependent);
                                in_flight.push(self.load_task(dependent));
                            }
                        }
                    }
                }
                Err(err) => {
                    report.failed.push((id.to_string(), err));
                    let mut blocked = vec![id];
                    while let Some(failed) = blocked.pop() {
                        for dependent in dependents.get(failed).cloned().unwrap_or_default() {
                            if waiting.remove(dependent).is_some() {
                                warn!(unit = %dependent, blocked_by = %id, "load skipped");
                                report.skipped.push((dependent.to_string(), id.to_string()));
                                blocked.push(dependent);
                            }
                        }
                    }
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "load pass complete"
        );
        report
    }

    async fn load_task<'a>(&self, id: &'a str) -> (&'a str, Result<(), LifecycleError>) {
        let _permit = self.load_permits.acquire().await.ok();
        (id, self.load(id).await)
    }

    // ---- unload ----

    /// Run the cleanup hook and drop the instance.
    ///
    /// Refused with `Busy` while live units depend on this one or when the
    /// unit vetoes. A failing cleanup hook leaves the unit `Active`.
    pub async fn unload(&self, id: &str) -> Result<(), LifecycleError> {
        let span = LifecycleSpan::new("unload", id);
        let result = async {
            let lease = self.lease(id).await?;
            self.unload_leased(&lease).await
        }
        .instrument(span.clone())
        .await;
        span.record_result(&result);
        result
    }

    async fn unload_leased(&self, lease: &UnitLease) -> Result<(), LifecycleError> {
        let slot = &lease.slot;
        let (unit, version, data) = {
            let record = slot.record.read();
            match (&record.live, record.state) {
                (Some(live), LifecycleState::Active) => {
                    (Arc::clone(&live.unit), live.version.clone(), live.data.clone())
                }
                (_, state) => {
                    return Err(LifecycleError::InvalidTransition {
                        unit: slot.id.clone(),
                        from: state,
                        to: LifecycleState::Unloading,
                    })
                }
            }
        };
        let dependents = self.live_dependents(&slot.id);
        if !dependents.is_empty() {
            return Err(self.busy(slot, BusyReason::Dependents(dependents)));
        }
        if !unit.can_unload() {
            return Err(self.busy(slot, BusyReason::Vetoed));
        }

        self.transition(slot, LifecycleState::Unloading)?;
        let mut pending = PendingTransition::new(self, slot, LifecycleState::Unloading, LifecycleState::Active);

        // A dependent may have started loading between the check and the transition.
        let dependents = self.live_dependents(&slot.id);
        if !dependents.is_empty() {
            pending.disarm();
            self.transition(slot, LifecycleState::Active)?;
            return Err(self.busy(slot, BusyReason::Dependents(dependents)));
        }

        self.bus.unbind(&slot.id);
        let ctx = self.context(&slot.id, version, data);
        let cleaned = run_hook(unit, ctx, HookKind::Cleanup, self.config.hook_timeout).await;
        pending.disarm();
        match cleaned {
            Ok(_) => {
                self.transition_with(slot, LifecycleState::Unloaded, |record| {
                    record.live = None;
                    record.metrics.unloads += 1;
                })?;
                self.bus.forget(&slot.id);
                telemetry::record_unload(&self.metrics, &slot.id);
                Ok(())
            }
            Err(err) => {
                self.transition_with(slot, LifecycleState::Active, |record| {
                    record.last_error = Some(err.to_string());
                })?;
                self.bind_endpoint(slot);
                Err(err)
            }
        }
    }

    fn busy(&self, slot: &UnitSlot, reason: BusyReason) -> LifecycleError {
        warn!(unit = %slot.id, %reason, "unload refused");
        LifecycleError::Busy {
            unit: slot.id.clone(),
            reason,
        }
    }

    // ---- suspend / resume ----

    /// Pause an `Active` unit. Messages to it fail with `Unavailable` until resumed.
    pub async fn suspend(&self, id: &str) -> Result<(), LifecycleError> {
        let lease = self.lease(id).await?;
        self.suspend_leased(&lease).await
    }

    pub async fn resume(&self, id: &str) -> Result<(), LifecycleError> {
        let lease = self.lease(id).await?;
        self.resume_leased(&lease).await
    }

    /// `Active -> Suspended`, then the suspend hook. Hook failure leaves the unit `Failed`.
    pub(crate) async fn suspend_leased(&self, lease: &UnitLease) -> Result<(), LifecycleError> {
        self.begin_suspend(lease)?;
        if let Err(err) = self.run_suspend_hook(lease).await {
            self.fail(&lease.slot, &err);
            return Err(err);
        }
        Ok(())
    }

    /// `Active -> Suspended` without running any hook.
    pub(crate) fn begin_suspend(&self, lease: &UnitLease) -> Result<(), LifecycleError> {
        self.transition(&lease.slot, LifecycleState::Suspended).map(|_| ())
    }

    /// Suspend hook of a `Suspended` unit. On failure the instance stays in
    /// place, still `Suspended`, for the caller to resume or fail.
    pub(crate) async fn run_suspend_hook(&self, lease: &UnitLease) -> Result<(), LifecycleError> {
        let slot = &lease.slot;
        let (unit, ctx) = self
            .live_context(slot)
            .ok_or_else(|| LifecycleError::NotFound(slot.id.clone()))?;
        let outcome = run_hook(unit, ctx, HookKind::Suspend, self.config.hook_timeout).await?;
        if let Some(live) = slot.record.write().live.as_mut() {
            live.data = outcome.data;
        }
        Ok(())
    }

    /// Resume hook while `Suspended`, then `Suspended -> Active`.
    pub(crate) async fn resume_leased(&self, lease: &UnitLease) -> Result<(), LifecycleError> {
        let slot = &lease.slot;
        let state = slot.state();
        if state != LifecycleState::Suspended {
            return Err(LifecycleError::InvalidTransition {
                unit: slot.id.clone(),
                from: state,
                to: LifecycleState::Active,
            });
        }
        let Some((unit, ctx)) = self.live_context(slot) else {
            let err = LifecycleError::NotFound(slot.id.clone());
            self.fail(slot, &err);
            return Err(err);
        };
        match run_hook(unit, ctx, HookKind::Resume, self.config.hook_timeout).await {
            Ok(outcome) => {
                self.transition_with(slot, LifecycleState::Active, |record| {
                    if let Some(live) = record.live.as_mut() {
                        live.data = outcome.data;
                    }
                })?;
                Ok(())
            }
            Err(err) => {
                self.fail(slot, &err);
                Err(err)
            }
        }
    }

    /// Put a suspended unit back to `Active` without awaiting anything.
    /// The resume hook runs in the background when a runtime is available.
    pub(crate) fn reactivate_now(&self, lease: &UnitLease) {
        let slot = &lease.slot;
        if slot.state() != LifecycleState::Suspended {
            return;
        }
        if let Err(err) = self.transition(slot, LifecycleState::Active) {
            warn!(unit = %slot.id, error = %err, "could not reactivate unit");
            return;
        }
        let Some((unit, ctx)) = self.live_context(slot) else {
            return;
        };
        let timeout = self.config.hook_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let id = slot.id.clone();
                handle.spawn(async move {
                    if let Err(err) = run_hook(unit, ctx, HookKind::Resume, timeout).await {
                        warn!(unit = %id, error = %err, "background resume failed");
                    }
                });
            }
            Err(_) => warn!(unit = %slot.id, "no runtime; resume hook skipped"),
        }
    }

    fn live_context(&self, slot: &UnitSlot) -> Option<(Arc<dyn Unit>, UnitContext)> {
        let record = slot.record.read();
        let live = record.live.as_ref()?;
        Some((
            Arc::clone(&live.unit),
            self.context(&slot.id, live.version.clone(), live.data.clone()),
        ))
    }

    // ---- swap commit ----

    /// Replace the live instance of a `Suspended` unit and make it `Active`,
    /// in one step. Returns the replaced instance.
    pub(crate) fn commit_swap(&self, lease: &UnitLease, next: LiveInstance) -> Result<LiveInstance, LifecycleError> {
        let slot = &lease.slot;
        let version = next.version.clone();
        let (from, previous) = {
            let mut record = slot.record.write();
            let from = record.state;
            if from != LifecycleState::Suspended || record.live.is_none() {
                return Err(LifecycleError::InvalidTransition {
                    unit: slot.id.clone(),
                    from,
                    to: LifecycleState::Active,
                });
            }
            let previous = record.live.replace(next);
            record.state = LifecycleState::Active;
            record.metrics.swaps += 1;
            record.last_error = None;
            (from, previous)
        };
        self.publish(&slot.id, from, LifecycleState::Active, Some(version));
        previous.ok_or_else(|| LifecycleError::NotFound(slot.id.clone()))
    }

    pub(crate) fn note_swap_duration(&self, lease: &UnitLease, elapsed: Duration) {
        lease.slot.record.write().metrics.last_swap_ms = Some(elapsed.as_millis() as u64);
    }

    /// Replace the data of the live instance.
    pub async fn update_data<F>(&self, id: &str, update: F) -> Result<InstanceData, LifecycleError>
    where
        F: FnOnce(&mut InstanceData),
    {
        let lease = self.lease(id).await?;
        let mut record = lease.slot.record.write();
        let state = record.state;
        let live = record.live.as_mut().ok_or(LifecycleError::InvalidTransition {
            unit: id.to_string(),
            from: state,
            to: LifecycleState::Active,
        })?;
        update(&mut live.data);
        Ok(live.data.clone())
    }

    // ---- notifications ----

    /// Send a runtime message to `id`; failures are logged only.
    pub(crate) async fn notify(&self, id: &str, kind: &str, payload: Payload) {
        let envelope = MessageEnvelope::system(id, kind).with_payload(payload);
        if let Err(err) = self.bus.send(envelope).await {
            debug!(unit = %id, kind, error = %err, "notification not delivered");
        }
    }

    pub(crate) async fn notify_swapped(&self, id: &str, from: &Version, to: &Version) {
        for dependent in self.active_dependents(id) {
            let mut payload = Payload::new();
            payload.insert("unit".into(), Value::String(id.to_string()));
            payload.insert("from".into(), json!(from.to_string()));
            payload.insert("to".into(), json!(to.to_string()));
            self.notify(&dependent, kinds::SWAPPED, payload).await;
        }
    }
}
