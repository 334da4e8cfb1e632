//! Unit management.
//!
//! Discovery of manifests, dependency resolution, the lifecycle registry and
//! hot-swap of live instances.

pub mod manifest;

mod descriptor;
mod discovery;
mod error;
mod hook;
mod lifecycle;
mod preload;
mod registry;
mod resolver;
mod swap;
mod unit;

pub use descriptor::UnitDescriptor;
pub use discovery::{DirectorySource, DiscoveryReport, ManifestSource, RawManifest, StaticSource, UnitDiscovery};
pub use error::{BusyReason, DependencyError, DiscoveryError, HookError, HotSwapError, LifecycleError};
pub use lifecycle::{HookKind, LifecycleEvent, LifecycleState};
pub use manifest::{ManifestFormat, UnitManifest};
pub use registry::{
    LoadReport, RegistryConfig, RegistryId, SyncReport, UnitInstance, UnitMetrics, UnitRegistry, UnitStatus,
};
pub use resolver::{DependencyResolver, LoadPlan};
pub use swap::{ConflictPolicy, HotSwapCoordinator, SwapConfig, SwapPhase, SwapReport};
pub use unit::{PassiveUnit, PassiveUnitFactory, Unit, UnitContext, UnitFactory};
